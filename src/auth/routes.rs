//! Auth routes and sign-in page

use axum::{
    Form, Router,
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use url::Url;

use super::callback::{callback, request_url};
use super::grant::GrantSubtype;
use super::middleware::load_session;
use super::pkce::PkcePair;
use super::redirect::{
    RedirectContext, RedirectDecision, RedirectTarget, login_with_error, resolve,
};
use super::signout::signout;
use crate::AppState;
use crate::config::RoutesConfig;
use crate::error::AppError;
use crate::metrics::record_auth_completion;

/// Create authentication router
///
/// Routes (paths from `routes` config):
/// - GET  /login - Sign-in page
/// - POST /login/magic-link - Email a sign-in link
/// - POST /login/password - Password sign-in
/// - GET  /auth/callback - Code and one-time-code grants
/// - GET  /auth/signout - Link-initiated signout
pub fn auth_router(routes: &RoutesConfig) -> Router<AppState> {
    let login = routes.login.trim_end_matches('/');
    Router::new()
        .route(&routes.login, get(login_page))
        .route(&format!("{login}/magic-link"), post(send_magic_link))
        .route(&format!("{login}/password"), post(password_sign_in))
        .route(&routes.callback, get(callback))
        .route(&routes.signout, get(signout))
}

// =============================================================================
// Sign-in Page
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    error: Option<String>,
    error_description: Option<String>,
    info: Option<String>,
    next: Option<String>,
}

/// GET /login
///
/// Already signed in: go to the safe `next` (or the dashboard).
/// Otherwise render the sign-in forms with any error from the query.
/// A refreshed session is written back to the cookie either way.
async fn login_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> Result<(CookieJar, Response), AppError> {
    let (session, jar) = load_session(&state, jar).await?;
    let routes = &state.config.routes;
    let next = query.next.as_deref().and_then(RedirectTarget::parse);

    if let Some(session) = session {
        let target = signed_in_target(
            session.requires_profile_completion(),
            next.as_ref().map(RedirectTarget::as_str),
            routes,
        );
        let origin = state.config.server.public_origin()?;
        let location = target
            .resolve_against(&origin)
            .map_err(|e| AppError::Internal(e.into()))?;
        return Ok((jar, Redirect::to(location.as_str()).into_response()));
    }

    let page = render_login_page(&query, next.as_ref(), routes);
    Ok((jar, Html(page).into_response()))
}

fn render_login_page(
    query: &LoginQuery,
    next: Option<&RedirectTarget>,
    routes: &RoutesConfig,
) -> String {
    let login = routes.login.trim_end_matches('/');
    let next_input = next
        .map(|next| render_hidden_input("next", next.as_str()))
        .unwrap_or_default();

    let mut messages = String::new();
    if let Some(error) = query.error.as_deref().filter(|e| !e.is_empty()) {
        let text = query
            .error_description
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| describe_error(error));
        messages.push_str(&format!(
            "<p class=\"message error\">{}</p>",
            html_escape::encode_text(text)
        ));
    }
    if query.info.as_deref() == Some("check_email") {
        messages.push_str("<p class=\"message\">Check your email for a sign-in link.</p>");
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign in - HIVE</title></head>
<body>
    <main>
        <h1>Sign in</h1>
        {messages}
        <form method="post" action="{login}/magic-link">
            {next_input}
            <label>Email <input type="email" name="email" required /></label>
            <button type="submit">Email me a sign-in link</button>
        </form>
        <form method="post" action="{login}/password">
            {next_input}
            <label>Email <input type="email" name="email" required /></label>
            <label>Password <input type="password" name="password" required /></label>
            <button type="submit">Sign in</button>
        </form>
    </main>
</body>
</html>
"#,
        login = html_escape::encode_double_quoted_attribute(login),
    )
}

fn render_hidden_input(name: &str, value: &str) -> String {
    format!(
        "<input type=\"hidden\" name=\"{}\" value=\"{}\" />",
        html_escape::encode_double_quoted_attribute(name),
        html_escape::encode_double_quoted_attribute(value)
    )
}

fn describe_error(code: &str) -> &'static str {
    match code {
        "otp_expired" => "That sign-in link is invalid or has expired. Request a new one.",
        "access_denied" => "Sign-in was cancelled.",
        "invalid_email" => "Enter a valid email address.",
        "invalid_credentials" => "Email or password is incorrect.",
        _ => "Could not finish sign-in.",
    }
}

fn signed_in_target(
    requires_profile_completion: bool,
    hint: Option<&str>,
    routes: &RoutesConfig,
) -> RedirectTarget {
    let ctx = RedirectContext {
        subtype: GrantSubtype::Other,
        hint,
        current_path: &routes.login,
        requires_profile_completion,
    };
    match resolve(&ctx, routes) {
        RedirectDecision::Navigate(target) => target,
        RedirectDecision::SoftRefresh => RedirectTarget::or_default(None, &routes.dashboard),
    }
}

// =============================================================================
// Sign-in Initiators
// =============================================================================

#[derive(Debug, Deserialize)]
struct MagicLinkForm {
    email: String,
    next: Option<String>,
}

/// POST /login/magic-link
///
/// # Steps
/// 1. Generate a PKCE pair
/// 2. Ask the provider to email a link back to the callback (with `next`)
/// 3. Store the verifier cookie for the callback
/// 4. Redirect to the sign-in page with a "check your email" notice
async fn send_magic_link(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<MagicLinkForm>,
) -> Result<(CookieJar, Redirect), AppError> {
    let routes = &state.config.routes;
    let origin = state.config.server.public_origin()?;
    let next = form.next.as_deref().and_then(RedirectTarget::parse);
    let login = login_url(&origin, routes, next.as_ref())?;

    let email = form.email.trim();
    if !is_plausible_email(email) {
        let target = login_with_error(&routes.login, &login, "invalid_email", None);
        return Ok((jar, redirect_on(&origin, target)?));
    }

    let pkce = PkcePair::generate();
    let mut redirect_to = origin
        .join(&routes.callback)
        .map_err(|e| AppError::Internal(e.into()))?;
    if let Some(next) = &next {
        redirect_to.query_pairs_mut().append_pair("next", next.as_str());
    }

    let provider = state.provider.open(None);
    if let Err(e) = provider
        .send_magic_link(email, redirect_to.as_str(), &pkce.challenge)
        .await
    {
        tracing::warn!(error = %e, "Magic link request failed");
        record_auth_completion("magic_link", "failed");
        let target = login_with_error(
            &routes.login,
            &login,
            "magic_link_failed",
            Some(&e.user_message()),
        );
        return Ok((jar, redirect_on(&origin, target)?));
    }

    tracing::info!("Magic link sent");
    let jar = state.cookies.write_code_verifier(jar, &pkce.verifier);

    let mut notice = login;
    notice.query_pairs_mut().append_pair("info", "check_email");
    let target = RedirectTarget::or_default(
        Some(&format!("{}?{}", notice.path(), notice.query().unwrap_or_default())),
        &routes.login,
    );
    Ok((jar, redirect_on(&origin, target)?))
}

#[derive(Debug, Deserialize)]
struct PasswordForm {
    email: String,
    password: String,
    next: Option<String>,
}

/// POST /login/password
async fn password_sign_in(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<PasswordForm>,
) -> Result<(CookieJar, Redirect), AppError> {
    let routes = &state.config.routes;
    let origin = state.config.server.public_origin()?;
    let next = form.next.as_deref().and_then(RedirectTarget::parse);
    let login = login_url(&origin, routes, next.as_ref())?;

    let email = form.email.trim();
    if !is_plausible_email(email) || form.password.is_empty() {
        let target = login_with_error(&routes.login, &login, "invalid_credentials", None);
        return Ok((jar, redirect_on(&origin, target)?));
    }

    let provider = state.provider.open(None);
    let session = match provider.sign_in_with_password(email, &form.password).await {
        Ok(session) => session,
        Err(e) => {
            tracing::info!(error = %e, "Password sign-in rejected");
            record_auth_completion("password", "failed");
            let target = login_with_error(
                &routes.login,
                &login,
                "invalid_credentials",
                Some(&e.user_message()),
            );
            return Ok((jar, redirect_on(&origin, target)?));
        }
    };

    record_auth_completion("password", "success");
    tracing::info!(user_id = %session.user_id(), "Signed in with password");

    let jar = state.cookies.write_session(jar, &session)?;
    let target = signed_in_target(
        session.requires_profile_completion(),
        next.as_ref().map(RedirectTarget::as_str),
        routes,
    );
    Ok((jar, redirect_on(&origin, target)?))
}

/// Sign-in page URL on the public origin, carrying `next` when present
fn login_url(
    origin: &Url,
    routes: &RoutesConfig,
    next: Option<&RedirectTarget>,
) -> Result<Url, AppError> {
    let query = next.map(|next| format!("next={}", urlencoding::encode(next.as_str())));
    request_url(origin, &routes.login, query.as_deref())
}

fn redirect_on(origin: &Url, target: RedirectTarget) -> Result<Redirect, AppError> {
    let location = target
        .resolve_against(origin)
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(Redirect::to(location.as_str()))
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}
