//! Redirect policy
//!
//! Every navigation the auth flows perform goes through this module.
//! Caller-supplied candidates (`next` hints, stored return paths) are
//! checked at each consuming site with [`RedirectTarget::parse`]; a
//! candidate that fails the check is dropped in favour of the site's
//! default and never reported to the user.

use url::Url;
use url::form_urlencoded;

use super::grant::{AUTH_PARAMS, GrantSubtype};
use crate::config::RoutesConfig;

/// Longest error description carried into a redirect
const MAX_DESCRIPTION_CHARS: usize = 200;

/// Whether `candidate` is a same-origin path
///
/// Accepts strings starting with exactly one `/`. Protocol-relative forms
/// (`//host`, `/\host`) and control characters are rejected because
/// browsers and URL parsers normalise them into a different origin.
pub fn is_path_absolute(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    if chars.next() != Some('/') {
        return false;
    }
    if matches!(chars.next(), Some('/') | Some('\\')) {
        return false;
    }
    !candidate.chars().any(char::is_control)
}

/// A validated, path-absolute navigation target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedirectTarget(String);

impl RedirectTarget {
    /// Validate an untrusted candidate
    pub fn parse(candidate: &str) -> Option<Self> {
        if is_path_absolute(candidate) {
            Some(Self(candidate.to_string()))
        } else {
            tracing::debug!(
                candidate_len = candidate.len(),
                "Discarding redirect candidate that is not path-absolute"
            );
            None
        }
    }

    /// Validate `candidate`, falling back to `default` when absent or unsafe
    pub fn or_default(candidate: Option<&str>, default: &str) -> Self {
        candidate
            .and_then(Self::parse)
            .or_else(|| Self::parse(default))
            .unwrap_or_else(|| Self("/".to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Absolute URL for this target on the configured public origin
    pub fn resolve_against(&self, origin: &Url) -> Result<Url, url::ParseError> {
        origin.join(&self.0)
    }
}

impl std::fmt::Display for RedirectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RedirectTarget {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Inputs to [`resolve`]
#[derive(Debug, Clone, Copy)]
pub struct RedirectContext<'a> {
    /// Kind of link that produced the session
    pub subtype: GrantSubtype,
    /// Caller-supplied `next` hint, unvalidated
    pub hint: Option<&'a str>,
    /// Path the user is currently on
    pub current_path: &'a str,
    /// Session metadata demands the profile-completion step
    pub requires_profile_completion: bool,
}

/// What the caller should do once a grant has been consumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectDecision {
    Navigate(RedirectTarget),
    /// Stay on the current page and re-fetch its data
    SoftRefresh,
}

/// Decide where a freshly signed-in user goes
pub fn resolve(ctx: &RedirectContext<'_>, routes: &RoutesConfig) -> RedirectDecision {
    let settings =
        || RedirectDecision::Navigate(RedirectTarget::or_default(None, &routes.settings));

    // Profile completion first, so no hint can skip it.
    if ctx.requires_profile_completion {
        if ctx.current_path == routes.settings {
            return RedirectDecision::SoftRefresh;
        }
        return settings();
    }

    if let Some(target) = ctx.hint.and_then(RedirectTarget::parse) {
        return RedirectDecision::Navigate(target);
    }

    if ctx.subtype.lands_on_settings() {
        return settings();
    }

    if ctx.current_path == routes.landing {
        return RedirectDecision::Navigate(RedirectTarget::or_default(None, &routes.dashboard));
    }

    RedirectDecision::SoftRefresh
}

/// Sign-in page carrying an error
///
/// Query parameters already on `current` are kept, `next` included. The
/// consumed grant parameters in [`AUTH_PARAMS`] are dropped, so a code or
/// token hash never travels on to the sign-in page. `error` and
/// `error_description` are then set.
pub fn login_with_error(
    login: &str,
    current: &Url,
    error: &str,
    description: Option<&str>,
) -> RedirectTarget {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in current.query_pairs() {
        if !AUTH_PARAMS.contains(&key.as_ref()) {
            serializer.append_pair(&key, &value);
        }
    }
    serializer.append_pair("error", &sanitize_description(error));
    if let Some(description) = description
        .map(sanitize_description)
        .filter(|d| !d.is_empty())
    {
        serializer.append_pair("error_description", &description);
    }

    let login = RedirectTarget::or_default(Some(login), "/login");
    let path = login.as_str().split('?').next().unwrap_or("/login");
    RedirectTarget(format!("{path}?{}", serializer.finish()))
}

/// Sign-in page, remembering `path` when it is inside the protected area
pub fn login_with_next(path: &str, routes: &RoutesConfig) -> RedirectTarget {
    let login = RedirectTarget::or_default(None, &routes.login);
    let path_only = path.split(['?', '#']).next().unwrap_or_default();
    if is_path_absolute(path) && routes.is_protected(path_only) {
        RedirectTarget(format!("{login}?next={}", urlencoding::encode(path)))
    } else {
        login
    }
}

/// Make a provider message safe to carry in a query string and show to a user
pub fn sanitize_description(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    cleaned.trim().chars().take(MAX_DESCRIPTION_CHARS).collect()
}
