//! Client-initiated signout

use super::Navigator;
use crate::auth::cancel::CancelToken;
use crate::auth::provider::SessionProvider;
use crate::auth::redirect::RedirectTarget;
use crate::config::RoutesConfig;
use crate::metrics::record_signout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignoutOutcome {
    /// Navigated to the sign-in page; `error` holds the provider's
    /// complaint when remote teardown failed
    Completed { error: Option<String> },
    Cancelled,
}

/// Terminate the session, then go to the sign-in page whatever happened
pub async fn sign_out(
    provider: &dyn SessionProvider,
    navigator: &dyn Navigator,
    routes: &RoutesConfig,
    cancel: &CancelToken,
) -> SignoutOutcome {
    let error = match provider.sign_out().await {
        Ok(()) => {
            record_signout("client", "success");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Provider signout failed; leaving anyway");
            record_signout("client", "failed");
            Some(e.user_message())
        }
    };

    if cancel.is_cancelled() {
        return SignoutOutcome::Cancelled;
    }

    navigator.replace(&RedirectTarget::or_default(None, &routes.login));
    navigator.refresh();
    SignoutOutcome::Completed { error }
}
