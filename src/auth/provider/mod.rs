//! Session provider capability set
//!
//! The platform never implements identity itself. Everything it needs from
//! the hosted identity service goes through [`SessionProvider`], which makes
//! the service substitutable in tests.

mod gotrue;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use super::session::{Session, SessionEvent};

pub use gotrue::{GoTrueClient, GoTrueHandle};

/// Errors reported by the identity provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with an error status
    #[error("{message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The request never produced a usable answer (network, timeout, TLS)
    #[error("Provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The operation needs a session and there is none
    #[error("No active session")]
    NoSession,

    /// The provider answered with something we could not interpret
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),
}

impl ProviderError {
    /// The provider could not give a verdict right now
    ///
    /// Timeouts, unreachable hosts, rate limiting and 5xx answers say
    /// nothing about whether the stored session is still valid.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Human-readable description suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::Api { message, .. } if !message.trim().is_empty() => message.clone(),
            ProviderError::Api { .. } => "Could not finish sign-in.".to_string(),
            ProviderError::Transport(e) if e.is_timeout() => {
                "The sign-in service timed out. Please try again.".to_string()
            }
            ProviderError::Transport(_) => {
                "The sign-in service could not be reached. Please try again.".to_string()
            }
            ProviderError::NoSession => "You are not signed in.".to_string(),
            ProviderError::InvalidResponse(_) | ProviderError::InvalidConfig(_) => {
                "Could not finish sign-in.".to_string()
            }
        }
    }
}

/// Credential handed to [`SessionProvider::exchange_grant`]
#[derive(Clone, PartialEq, Eq)]
pub enum GrantCredential {
    /// Implicit-grant token pair taken from a URL fragment
    Tokens {
        access_token: String,
        refresh_token: String,
    },
    /// PKCE authorization code, with the verifier stored when sign-in started
    Code {
        code: String,
        code_verifier: Option<String>,
    },
}

impl std::fmt::Debug for GrantCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrantCredential::Tokens { .. } => f.write_str("Tokens(***)"),
            GrantCredential::Code { code_verifier, .. } => f
                .debug_struct("Code")
                .field("code", &"***")
                .field("has_verifier", &code_verifier.is_some())
                .finish(),
        }
    }
}

impl GrantCredential {
    pub fn kind(&self) -> &'static str {
        match self {
            GrantCredential::Tokens { .. } => "implicit",
            GrantCredential::Code { .. } => "code",
        }
    }
}

/// One-time code types understood by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtpType {
    Signup,
    Invite,
    Magiclink,
    Recovery,
    EmailChange,
    Email,
}

impl OtpType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "signup" => Some(OtpType::Signup),
            "invite" => Some(OtpType::Invite),
            "magiclink" => Some(OtpType::Magiclink),
            "recovery" => Some(OtpType::Recovery),
            "email_change" => Some(OtpType::EmailChange),
            "email" => Some(OtpType::Email),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OtpType::Signup => "signup",
            OtpType::Invite => "invite",
            OtpType::Magiclink => "magiclink",
            OtpType::Recovery => "recovery",
            OtpType::EmailChange => "email_change",
            OtpType::Email => "email",
        }
    }
}

impl std::fmt::Display for OtpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a subscription yields
#[derive(Debug, Clone)]
pub enum SessionNotice {
    /// A session change, in order
    Changed(SessionEvent),
    /// Some notifications were dropped; re-read the current session
    Missed(u64),
}

/// Live subscription to session-change notifications
///
/// Dropping it releases the subscription.
#[derive(Debug)]
pub struct SessionSubscription {
    rx: broadcast::Receiver<SessionEvent>,
}

impl SessionSubscription {
    pub fn new(rx: broadcast::Receiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next notice
    ///
    /// Returns `None` once the provider has gone away.
    pub async fn recv(&mut self) -> Option<SessionNotice> {
        match self.rx.recv().await {
            Ok(event) => Some(SessionNotice::Changed(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Some(SessionNotice::Missed(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// Capabilities consumed from the identity provider
///
/// Each call is independent; callers sequence them explicitly when order
/// matters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Turn an implicit token pair or a PKCE code into a session
    async fn exchange_grant(&self, credential: GrantCredential) -> Result<Session, ProviderError>;

    /// Verify a one-time code hash of the given type
    async fn verify_one_time_code(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<Session, ProviderError>;

    /// Current session, refreshed first if it has expired
    async fn current_session(&self) -> Result<Option<Session>, ProviderError>;

    /// Subscribe to session-change notifications
    fn subscribe(&self) -> SessionSubscription;

    /// Terminate the current session
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Email a sign-in link that returns to `redirect_to` with a PKCE code
    async fn send_magic_link(
        &self,
        email: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<(), ProviderError>;

    /// Sign in with email and password
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError>;
}

/// Process-wide handle to the identity provider
///
/// Created once at start-up. A browser keeps a single scope open for its
/// lifetime; the server opens one scope per request, seeded from cookies.
pub trait ProviderHandle: Send + Sync {
    /// Open a provider scope holding `restored` as its current session
    fn open(&self, restored: Option<Session>) -> Arc<dyn SessionProvider>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::SessionChange;

    #[test]
    fn otp_type_round_trips_known_values() {
        for value in ["signup", "invite", "magiclink", "recovery", "email_change", "email"] {
            let parsed = OtpType::parse(value).expect("known type");
            assert_eq!(parsed.as_str(), value);
        }
        assert_eq!(OtpType::parse("sms"), None);
        assert_eq!(OtpType::parse(""), None);
    }

    #[test]
    fn credential_debug_redacts_secrets() {
        let credential = GrantCredential::Code {
            code: "abc123".to_string(),
            code_verifier: Some("verifier".to_string()),
        };
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("abc123"));
        assert!(!rendered.contains("verifier\""));
        assert!(rendered.contains("has_verifier: true"));
    }

    #[test]
    fn api_error_message_is_shown_to_user() {
        let error = ProviderError::Api {
            status: 403,
            code: Some("otp_expired".to_string()),
            message: "Email link is invalid or has expired".to_string(),
        };
        assert_eq!(error.user_message(), "Email link is invalid or has expired");
        assert_eq!(
            ProviderError::InvalidResponse("missing user".to_string()).user_message(),
            "Could not finish sign-in."
        );
    }

    #[test]
    fn only_outages_are_transient() {
        let api = |status| ProviderError::Api {
            status,
            code: None,
            message: String::new(),
        };
        assert!(api(503).is_transient());
        assert!(api(500).is_transient());
        assert!(api(429).is_transient());
        assert!(!api(400).is_transient());
        assert!(!api(401).is_transient());
        assert!(!ProviderError::NoSession.is_transient());
        assert!(!ProviderError::InvalidResponse("missing user".to_string()).is_transient());
    }

    #[tokio::test]
    async fn subscription_reports_missed_notifications() {
        let (tx, rx) = broadcast::channel(1);
        let mut subscription = SessionSubscription::new(rx);

        for change in [SessionChange::SignedIn, SessionChange::SignedOut] {
            tx.send(SessionEvent {
                change,
                session: None,
            })
            .expect("receiver alive");
        }

        assert!(matches!(subscription.recv().await, Some(SessionNotice::Missed(1))));
        assert!(matches!(
            subscription.recv().await,
            Some(SessionNotice::Changed(SessionEvent {
                change: SessionChange::SignedOut,
                ..
            }))
        ));

        drop(tx);
        assert!(subscription.recv().await.is_none());
    }
}
