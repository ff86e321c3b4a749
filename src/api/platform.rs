//! Member area pages
//!
//! Minimal shell pages behind [`require_session`]. Page content beyond
//! the shell lives elsewhere.

use axum::{
    Router,
    extract::State,
    http::Uri,
    middleware,
    response::Html,
    routing::get,
};

use crate::AppState;
use crate::auth::{CurrentSession, Session, require_session};

/// Create member area router
///
/// Routes (paths from `routes` config):
/// - GET /platform - Dashboard
/// - GET /platform/settings - Settings (profile completion)
/// - GET /platform/* - Any other member page
pub fn platform_router(state: AppState) -> Router<AppState> {
    let routes = &state.config.routes;
    let prefix = routes.protected_prefix.trim_end_matches('/');

    Router::new()
        .route(&routes.dashboard, get(dashboard))
        .route(&routes.settings, get(settings))
        .route(&format!("{prefix}/*rest"), get(member_page))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session))
}

/// GET /platform
async fn dashboard(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Html<String> {
    let body = format!(
        "<h1>Welcome, {}</h1>",
        html_escape::encode_text(display_name(&session))
    );
    Html(render_shell(&state, "Dashboard", &body))
}

/// GET /platform/settings
async fn settings(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Html<String> {
    let mut body = String::from("<h1>Settings</h1>");
    if session.requires_profile_completion() {
        body.push_str(
            "<p class=\"message\">Set a password to finish setting up your account.</p>",
        );
    }
    if let Some(email) = &session.user.email {
        body.push_str(&format!(
            "<p>Signed in as {}</p>",
            html_escape::encode_text(email)
        ));
    }
    Html(render_shell(&state, "Settings", &body))
}

/// GET /platform/*
async fn member_page(State(state): State<AppState>, uri: Uri) -> Html<String> {
    let body = format!("<h1>{}</h1>", html_escape::encode_text(uri.path()));
    Html(render_shell(&state, "Member area", &body))
}

fn display_name(session: &Session) -> &str {
    session
        .metadata()
        .get("full_name")
        .and_then(|name| name.as_str())
        .or(session.user.email.as_deref())
        .unwrap_or("member")
}

fn render_shell(state: &AppState, title: &str, body: &str) -> String {
    let routes = &state.config.routes;
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{title} - HIVE</title></head>
<body>
    <nav>
        <a href="{dashboard}">Dashboard</a>
        <a href="{settings}">Settings</a>
        <a href="{signout}">Sign out</a>
    </nav>
    <main>{body}</main>
</body>
</html>
"#,
        title = html_escape::encode_text(title),
        dashboard = html_escape::encode_double_quoted_attribute(&routes.dashboard),
        settings = html_escape::encode_double_quoted_attribute(&routes.settings),
        signout = html_escape::encode_double_quoted_attribute(&routes.signout),
    )
}
