//! Guard decision
//!
//! The same evaluation backs the client [`SessionGuard`](super::client::SessionGuard)
//! and the server route middleware. A decision is always computed from
//! scratch from the session the provider reports; it is never patched.

use super::redirect::{RedirectTarget, login_with_next};
use super::session::Session;
use crate::config::RoutesConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// The session has not been read yet
    Loading,
    Allow,
    RedirectTo(RedirectTarget),
}

impl GuardDecision {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            GuardDecision::Loading => "loading",
            GuardDecision::Allow => "allow",
            GuardDecision::RedirectTo(_) => "redirect",
        }
    }
}

/// Decide what a protected page at `path` may do for `session`
pub fn evaluate(session: Option<&Session>, path: &str, routes: &RoutesConfig) -> GuardDecision {
    let Some(session) = session else {
        return GuardDecision::RedirectTo(login_with_next(path, routes));
    };

    let path_only = path.split(['?', '#']).next().unwrap_or_default();
    if session.requires_profile_completion() && path_only != routes.settings {
        return GuardDecision::RedirectTo(RedirectTarget::or_default(None, &routes.settings));
    }

    GuardDecision::Allow
}

/// What a guarded page shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardView<T> {
    /// Neutral placeholder while loading
    Placeholder,
    Content(T),
    /// Navigation is pending; show nothing
    Nothing,
}

/// Render `content` according to `decision`
///
/// `content` is only invoked once access is allowed.
pub fn render<T>(decision: &GuardDecision, content: impl FnOnce() -> T) -> GuardView<T> {
    match decision {
        GuardDecision::Loading => GuardView::Placeholder,
        GuardDecision::Allow => GuardView::Content(content()),
        GuardDecision::RedirectTo(_) => GuardView::Nothing,
    }
}
