//! Session exchanger
//!
//! Consumes grants delivered in the URL fragment (implicit tokens) and
//! errors delivered in either URL component. Code and one-time-code
//! grants are left to the server callback.

use std::sync::Arc;

use url::Url;

use super::Navigator;
use crate::auth::cancel::CancelToken;
use crate::auth::grant::{self, AuthCompletionRequest};
use crate::auth::provider::{GrantCredential, SessionProvider};
use crate::auth::redirect::{
    RedirectContext, RedirectDecision, RedirectTarget, login_with_error, resolve,
};
use crate::config::RoutesConfig;
use crate::metrics::record_auth_completion;

/// Error code carried to the sign-in page when an exchange fails
const EXCHANGE_FAILED: &str = "auth_error";

/// How one run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Nothing for the client to consume
    NoGrant,
    Redirected(RedirectTarget),
    Refreshed,
    /// The page went away before the exchange finished; nothing was done
    Cancelled,
}

/// Client-side grant consumer, run once per page load
pub struct SessionExchanger {
    provider: Arc<dyn SessionProvider>,
    navigator: Arc<dyn Navigator>,
    routes: RoutesConfig,
}

impl SessionExchanger {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        navigator: Arc<dyn Navigator>,
        routes: RoutesConfig,
    ) -> Self {
        Self {
            provider,
            navigator,
            routes,
        }
    }

    /// Consume whatever grant `url` carries
    ///
    /// Taking `self` by value means a grant is exchanged at most once.
    pub async fn run(self, url: &Url, cancel: &CancelToken) -> ExchangeOutcome {
        if cancel.is_cancelled() {
            return ExchangeOutcome::Cancelled;
        }

        match grant::parse(url) {
            AuthCompletionRequest::ErrorGrant { code, description } => {
                tracing::info!(error = %code, "Sign-in link reported an error");
                record_auth_completion("error", "rejected");
                self.navigator.clear_fragment();
                let target =
                    login_with_error(&self.routes.login, url, &code, description.as_deref());
                self.navigator.replace(&target);
                ExchangeOutcome::Redirected(target)
            }
            AuthCompletionRequest::ImplicitGrant {
                access_token,
                refresh_token,
                subtype,
            } => {
                let result = self
                    .provider
                    .exchange_grant(GrantCredential::Tokens {
                        access_token,
                        refresh_token,
                    })
                    .await;

                if cancel.is_cancelled() {
                    tracing::debug!("Page unmounted during exchange; dropping result");
                    return ExchangeOutcome::Cancelled;
                }
                self.navigator.clear_fragment();

                let session = match result {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::warn!(error = %e, "Implicit grant exchange failed");
                        record_auth_completion("implicit", "failed");
                        let target = login_with_error(
                            &self.routes.login,
                            url,
                            EXCHANGE_FAILED,
                            Some(&e.user_message()),
                        );
                        self.navigator.replace(&target);
                        return ExchangeOutcome::Redirected(target);
                    }
                };

                tracing::info!(
                    user_id = %session.user_id(),
                    subtype = ?subtype,
                    "Session established from implicit grant"
                );
                record_auth_completion("implicit", "success");

                let hint = grant::next_hint(url);
                let ctx = RedirectContext {
                    subtype,
                    hint: hint.as_deref(),
                    current_path: url.path(),
                    requires_profile_completion: session.requires_profile_completion(),
                };
                match resolve(&ctx, &self.routes) {
                    RedirectDecision::Navigate(target) => {
                        self.navigator.replace(&target);
                        ExchangeOutcome::Redirected(target)
                    }
                    RedirectDecision::SoftRefresh => {
                        self.navigator.refresh();
                        ExchangeOutcome::Refreshed
                    }
                }
            }
            AuthCompletionRequest::CodeGrant { .. }
            | AuthCompletionRequest::OtpGrant { .. }
            | AuthCompletionRequest::Empty => ExchangeOutcome::NoGrant,
        }
    }
}
