//! Route guard middleware
//!
//! Protects the member area on the server side with the same decision
//! the client guard makes.

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;

use super::guard::{GuardDecision, evaluate};
use super::session::Session;
use crate::AppState;
use crate::error::AppError;
use crate::metrics::GUARD_DECISIONS_TOTAL;

/// Read the session from cookies, refreshing it through the provider
///
/// Returns the session (if any) and the jar with the cookie brought up to
/// date: rewritten after a refresh, cleared once the provider has rejected
/// it. When the provider is unavailable the request gets no session but the
/// cookie is left alone.
pub(crate) async fn load_session(
    state: &AppState,
    jar: CookieJar,
) -> Result<(Option<Session>, CookieJar), AppError> {
    let Some(restored) = state.cookies.read_session(&jar) else {
        return Ok((None, state.cookies.clear_session(jar)));
    };

    let provider = state.provider.open(Some(restored.clone()));
    match provider.current_session().await {
        Ok(Some(current)) if current != restored => {
            tracing::debug!(user_id = %current.user_id(), "Session refreshed; rewriting cookie");
            let jar = state.cookies.write_session(jar, &current)?;
            Ok((Some(current), jar))
        }
        Ok(Some(current)) => Ok((Some(current), jar)),
        Ok(None) => Ok((None, state.cookies.clear_session(jar))),
        Err(e) if e.is_transient() => {
            tracing::warn!(
                error = %e,
                user_id = %restored.user_id(),
                "Provider unavailable; keeping stored session"
            );
            Ok((None, jar))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                user_id = %restored.user_id(),
                "Stored session is no longer usable"
            );
            Ok((None, state.cookies.clear_session(jar)))
        }
    }
}

/// Middleware to require a session
///
/// No session: redirect to the sign-in page (with `next` for this path).
/// Profile completion pending: redirect to settings. Otherwise the
/// session is added to request extensions.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/platform", ...)
///     .route_layer(middleware::from_fn_with_state(state, require_session));
/// ```
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let (session, jar) = load_session(&state, jar).await?;
    let decision = evaluate(session.as_ref(), &path, &state.config.routes);
    GUARD_DECISIONS_TOTAL
        .with_label_values(&[decision.label()])
        .inc();

    match (decision, session) {
        (GuardDecision::Allow, Some(session)) => {
            request.extensions_mut().insert(session);
            let response = next.run(request).await;
            Ok((jar, response).into_response())
        }
        (GuardDecision::RedirectTo(target), _) => {
            tracing::debug!(path = %path, target = %target, "Guard redirecting");
            let origin = state.config.server.public_origin()?;
            let location = target
                .resolve_against(&origin)
                .map_err(|e| AppError::Internal(e.into()))?;
            Ok((jar, Redirect::to(location.as_str())).into_response())
        }
        _ => Err(AppError::Unauthorized),
    }
}

/// Extractor for the current session
///
/// Only succeeds behind [`require_session`].
///
/// # Usage
/// ```ignore
/// async fn handler(CurrentSession(session): CurrentSession) -> impl IntoResponse {
///     format!("Hello, {}", session.user_id())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(CurrentSession)
            .ok_or(AppError::Unauthorized)
    }
}
