//! Session model
//!
//! The identity provider owns the session. This module only describes
//! what the platform reads from it: the user, their metadata and the
//! token pair needed to keep talking to the provider.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key marking a mandatory profile-completion step
/// (invited users must set a password before anything else).
pub const PROFILE_COMPLETION_FLAG: &str = "must_set_password";

/// Seconds before `expires_at` at which a session is treated as expired.
const EXPIRY_MARGIN_SECONDS: i64 = 10;

/// Provider user record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Provider user identifier
    pub id: String,
    /// Email address, if the user has one
    #[serde(default)]
    pub email: Option<String>,
    /// Free-form metadata written by the platform
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

/// Provider session
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) at which the access token expires
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.user.user_metadata
    }

    /// Whether the user must finish their profile before using the platform
    pub fn requires_profile_completion(&self) -> bool {
        self.metadata()
            .get(PROFILE_COMPLETION_FLAG)
            .is_some_and(is_truthy)
    }

    /// Check if the access token is expired (or about to be)
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at - EXPIRY_MARGIN_SECONDS <= Utc::now().timestamp())
    }
}

/// Metadata flags are written by several tools; accept the usual spellings.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Kind of session change announced by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Session-change notification
///
/// Carries the provider's view of the session at the time of the change;
/// listeners must derive their state from it rather than from anything
/// they saw earlier.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub change: SessionChange,
    pub session: Option<Session>,
}

#[cfg(test)]
pub(crate) fn test_session(user_id: &str, metadata: Value) -> Session {
    let user_metadata = match metadata {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Session {
        access_token: format!("access-{user_id}"),
        refresh_token: format!("refresh-{user_id}"),
        expires_at: Some(Utc::now().timestamp() + 3600),
        user: User {
            id: user_id.to_string(),
            email: Some(format!("{user_id}@example.com")),
            user_metadata,
        },
    }
}
