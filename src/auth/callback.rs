//! Server callback handler
//!
//! Consumes code and one-time-code grants delivered to the callback path,
//! stores the resulting session in cookies and answers with a redirect.
//! Provider failures are not caught here; they surface through
//! [`AppError`]'s response mapping.

use axum::{
    extract::{RawQuery, State},
    response::Redirect,
};
use axum_extra::extract::CookieJar;
use url::Url;

use super::grant::{self, AuthCompletionRequest, GrantSubtype};
use super::provider::GrantCredential;
use super::redirect::{
    RedirectContext, RedirectDecision, RedirectTarget, login_with_error, resolve,
};
use super::session::Session;
use crate::AppState;
use crate::config::RoutesConfig;
use crate::error::AppError;
use crate::metrics::record_auth_completion;

/// GET /auth/callback
///
/// # Flow
/// 1. `code` present: exchange it (with the stored PKCE verifier)
/// 2. else `token_hash` + `type`: verify the one-time code
/// 3. else: nothing to exchange, redirect anyway
///
/// The `Location` is always built on the configured public origin.
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    RawQuery(query): RawQuery,
) -> Result<(CookieJar, Redirect), AppError> {
    let routes = &state.config.routes;
    let origin = state.config.server.public_origin()?;
    let current = request_url(&origin, &routes.callback, query.as_deref())?;
    let hint = grant::next_hint(&current);
    let request = grant::parse(&current);
    tracing::debug!(grant = %request.kind(), "Auth callback");

    let (jar, target) = match request {
        AuthCompletionRequest::CodeGrant { code } => {
            let code_verifier = state.cookies.read_code_verifier(&jar);
            let provider = state.provider.open(None);
            let session = provider
                .exchange_grant(GrantCredential::Code {
                    code,
                    code_verifier,
                })
                .await
                .inspect_err(|e| {
                    tracing::warn!(error = %e, "Code exchange failed");
                    record_auth_completion("code", "failed");
                })?;
            record_auth_completion("code", "success");
            tracing::info!(user_id = %session.user_id(), "Session established from code grant");

            let jar = state.cookies.write_session(jar, &session)?;
            let jar = state.cookies.clear_code_verifier(jar);
            let target = landing_target(&session, GrantSubtype::Other, hint.as_deref(), routes);
            (jar, target)
        }
        AuthCompletionRequest::OtpGrant {
            token_hash,
            otp_type,
        } => {
            let provider = state.provider.open(None);
            let session = provider
                .verify_one_time_code(&token_hash, otp_type)
                .await
                .inspect_err(|e| {
                    tracing::warn!(
                        error = %e,
                        otp_type = %otp_type,
                        "One-time code verification failed"
                    );
                    record_auth_completion("otp", "failed");
                })?;
            record_auth_completion("otp", "success");
            tracing::info!(
                user_id = %session.user_id(),
                otp_type = %otp_type,
                "Session established from one-time code"
            );

            let jar = state.cookies.write_session(jar, &session)?;
            let target = landing_target(&session, otp_type.into(), hint.as_deref(), routes);
            (jar, target)
        }
        AuthCompletionRequest::ErrorGrant { code, description } => {
            tracing::info!(error = %code, "Callback carried an error");
            record_auth_completion("error", "rejected");
            let target = login_with_error(&routes.login, &current, &code, description.as_deref());
            (jar, target)
        }
        AuthCompletionRequest::ImplicitGrant { .. } | AuthCompletionRequest::Empty => {
            tracing::debug!("Callback without a grant; redirecting without exchange");
            let target = RedirectTarget::or_default(hint.as_deref(), &routes.dashboard);
            (jar, target)
        }
    };

    let location = target
        .resolve_against(&origin)
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok((jar, Redirect::to(location.as_str())))
}

/// The request URL as seen on the public origin
pub(crate) fn request_url(origin: &Url, path: &str, query: Option<&str>) -> Result<Url, AppError> {
    let mut url = origin
        .join(path)
        .map_err(|e| AppError::Internal(e.into()))?;
    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}

fn landing_target(
    session: &Session,
    subtype: GrantSubtype,
    hint: Option<&str>,
    routes: &RoutesConfig,
) -> RedirectTarget {
    let ctx = RedirectContext {
        subtype,
        hint,
        current_path: &routes.callback,
        requires_profile_completion: session.requires_profile_completion(),
    };
    match resolve(&ctx, routes) {
        RedirectDecision::Navigate(target) => target,
        RedirectDecision::SoftRefresh => RedirectTarget::or_default(None, &routes.dashboard),
    }
}
