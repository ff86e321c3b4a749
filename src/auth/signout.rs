//! Link-initiated signout

use axum::{
    extract::{RawQuery, State},
    response::Redirect,
};
use axum_extra::extract::CookieJar;

use super::grant::next_from_query;
use super::redirect::RedirectTarget;
use crate::AppState;
use crate::error::AppError;
use crate::metrics::record_signout;

/// GET /auth/signout
///
/// Terminates the session with the provider, clears the session cookies
/// and redirects to the safe `next` (default: sign-in page). A provider
/// failure is logged and never blocks the redirect.
pub async fn signout(
    State(state): State<AppState>,
    jar: CookieJar,
    RawQuery(query): RawQuery,
) -> Result<(CookieJar, Redirect), AppError> {
    let origin = state.config.server.public_origin()?;
    let hint = next_from_query(query.as_deref());
    let target = RedirectTarget::or_default(hint.as_deref(), &state.config.routes.login);

    let restored = state.cookies.read_session(&jar);
    let user_id = restored.as_ref().map(|s| s.user_id().to_string());
    let provider = state.provider.open(restored);
    match provider.sign_out().await {
        Ok(()) => {
            tracing::info!(user_id = ?user_id, "Signed out");
            record_signout("link", "success");
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                user_id = ?user_id,
                "Provider signout failed; clearing cookies anyway"
            );
            record_signout("link", "failed");
        }
    }

    let jar = state.cookies.clear_session(jar);
    let location = target
        .resolve_against(&origin)
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok((jar, Redirect::to(location.as_str())))
}
