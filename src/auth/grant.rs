//! Grant parser
//!
//! Turns a navigation URL into exactly one [`AuthCompletionRequest`].
//! Parsing is pure: it never touches navigation state. Clearing the
//! fragment is a separate step taken by whoever consumes the grant.

use url::Url;
use url::form_urlencoded;

use super::provider::OtpType;

/// Query and fragment parameters the auth flows read or consume
pub const AUTH_PARAMS: &[&str] = &[
    "error",
    "error_code",
    "error_description",
    "access_token",
    "refresh_token",
    "type",
    "code",
    "token_hash",
];

/// Which kind of link delivered an implicit grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantSubtype {
    Magiclink,
    Invite,
    Recovery,
    Other,
}

impl GrantSubtype {
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("magiclink") => GrantSubtype::Magiclink,
            Some("invite") => GrantSubtype::Invite,
            Some("recovery") => GrantSubtype::Recovery,
            _ => GrantSubtype::Other,
        }
    }

    /// Links that must land the user where they can set a password
    pub fn lands_on_settings(self) -> bool {
        matches!(
            self,
            GrantSubtype::Magiclink | GrantSubtype::Invite | GrantSubtype::Recovery
        )
    }
}

impl From<OtpType> for GrantSubtype {
    fn from(otp_type: OtpType) -> Self {
        match otp_type {
            OtpType::Magiclink => GrantSubtype::Magiclink,
            OtpType::Invite => GrantSubtype::Invite,
            OtpType::Recovery => GrantSubtype::Recovery,
            OtpType::Signup | OtpType::EmailChange | OtpType::Email => GrantSubtype::Other,
        }
    }
}

/// Result of parsing one navigation URL
#[derive(Clone, PartialEq, Eq)]
pub enum AuthCompletionRequest {
    ImplicitGrant {
        access_token: String,
        refresh_token: String,
        subtype: GrantSubtype,
    },
    CodeGrant {
        code: String,
    },
    OtpGrant {
        token_hash: String,
        otp_type: OtpType,
    },
    ErrorGrant {
        code: String,
        description: Option<String>,
    },
    Empty,
}

impl std::fmt::Debug for AuthCompletionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthCompletionRequest::ImplicitGrant { subtype, .. } => f
                .debug_struct("ImplicitGrant")
                .field("subtype", subtype)
                .finish_non_exhaustive(),
            AuthCompletionRequest::CodeGrant { .. } => {
                f.debug_struct("CodeGrant").finish_non_exhaustive()
            }
            AuthCompletionRequest::OtpGrant { otp_type, .. } => f
                .debug_struct("OtpGrant")
                .field("otp_type", otp_type)
                .finish_non_exhaustive(),
            AuthCompletionRequest::ErrorGrant { code, description } => f
                .debug_struct("ErrorGrant")
                .field("code", code)
                .field("description", description)
                .finish(),
            AuthCompletionRequest::Empty => f.write_str("Empty"),
        }
    }
}

impl AuthCompletionRequest {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AuthCompletionRequest::ImplicitGrant { .. } => "implicit",
            AuthCompletionRequest::CodeGrant { .. } => "code",
            AuthCompletionRequest::OtpGrant { .. } => "otp",
            AuthCompletionRequest::ErrorGrant { .. } => "error",
            AuthCompletionRequest::Empty => "empty",
        }
    }
}

/// Decoded `key=value` pairs from one URL component
#[derive(Debug, Default)]
struct Params(Vec<(String, String)>);

impl Params {
    fn decode(raw: Option<&str>) -> Self {
        let raw = raw.unwrap_or_default();
        let raw = raw.strip_prefix('#').unwrap_or(raw);
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        Self(form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
    }

    /// First non-empty value for `name`
    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.as_str())
    }
}

/// Parse a full navigation URL
pub fn parse(url: &Url) -> AuthCompletionRequest {
    parse_parts(url.query(), url.fragment())
}

/// Parse a raw query string and fragment (either may carry a leading `?`/`#`)
pub fn parse_parts(query: Option<&str>, fragment: Option<&str>) -> AuthCompletionRequest {
    let query = Params::decode(query);
    let fragment = Params::decode(fragment);
    let either = |name: &str| fragment.get(name).or_else(|| query.get(name));

    // 1. Errors win over everything else.
    if let Some(code) = either("error_code").or_else(|| either("error")) {
        return AuthCompletionRequest::ErrorGrant {
            code: code.to_string(),
            description: either("error_description").map(ToOwned::to_owned),
        };
    }

    // 2. Implicit grant: token pair in the fragment only.
    if let (Some(access_token), Some(refresh_token)) =
        (fragment.get("access_token"), fragment.get("refresh_token"))
    {
        return AuthCompletionRequest::ImplicitGrant {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            subtype: GrantSubtype::from_param(fragment.get("type")),
        };
    }

    // 3. PKCE code.
    if let Some(code) = query.get("code") {
        return AuthCompletionRequest::CodeGrant {
            code: code.to_string(),
        };
    }

    // 4. One-time code hash.
    if let (Some(token_hash), Some(otp_type)) = (query.get("token_hash"), query.get("type")) {
        return match OtpType::parse(otp_type) {
            Some(otp_type) => AuthCompletionRequest::OtpGrant {
                token_hash: token_hash.to_string(),
                otp_type,
            },
            None => {
                tracing::debug!(otp_type, "Ignoring one-time code with unknown type");
                AuthCompletionRequest::Empty
            }
        };
    }

    AuthCompletionRequest::Empty
}

/// The `next` hint carried in the query string, unvalidated
pub fn next_hint(url: &Url) -> Option<String> {
    next_from_query(url.query())
}

/// Same as [`next_hint`] for a raw query string
pub fn next_from_query(query: Option<&str>) -> Option<String> {
    Params::decode(query).get("next").map(ToOwned::to_owned)
}
