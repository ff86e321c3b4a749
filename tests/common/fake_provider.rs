//! In-memory identity provider for E2E tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hive_platform::auth::provider::{
    GrantCredential, OtpType, ProviderError, ProviderHandle, SessionProvider, SessionSubscription,
};
use hive_platform::auth::session::{Session, SessionChange, SessionEvent};
use tokio::sync::broadcast;

/// Magic link request as the provider saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicLinkRequest {
    pub email: String,
    pub redirect_to: String,
    pub code_challenge: String,
}

#[derive(Default)]
struct FakeState {
    codes: HashMap<String, Session>,
    otps: HashMap<(String, OtpType), Session>,
    passwords: HashMap<(String, String), Session>,
    refreshes: HashMap<String, Session>,
    revoked: HashSet<String>,
    fail_sign_out: bool,
    outage: bool,
    calls: Vec<String>,
    code_verifiers: Vec<Option<String>>,
    magic_links: Vec<MagicLinkRequest>,
    signed_out_users: Vec<String>,
}

/// Shared fake identity service; opens scopes like the real handle
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn add_code(&self, code: &str, session: Session) {
        self.with(|s| s.codes.insert(code.to_string(), session));
    }

    pub fn add_otp(&self, token_hash: &str, otp_type: OtpType, session: Session) {
        self.with(|s| s.otps.insert((token_hash.to_string(), otp_type), session));
    }

    pub fn add_password(&self, email: &str, password: &str, session: Session) {
        self.with(|s| {
            s.passwords
                .insert((email.to_string(), password.to_string()), session)
        });
    }

    /// Refreshing with `refresh_token` yields `session`
    pub fn add_refresh(&self, refresh_token: &str, session: Session) {
        self.with(|s| s.refreshes.insert(refresh_token.to_string(), session));
    }

    pub fn revoke(&self, access_token: &str) {
        self.with(|s| s.revoked.insert(access_token.to_string()));
    }

    pub fn fail_sign_out(&self) {
        self.with(|s| s.fail_sign_out = true);
    }

    /// Refreshes fail with a 503 until further notice
    pub fn start_outage(&self) {
        self.with(|s| s.outage = true);
    }

    /// Provider calls in order, e.g. `"exchange_grant:code"`
    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn code_verifiers(&self) -> Vec<Option<String>> {
        self.with(|s| s.code_verifiers.clone())
    }

    pub fn magic_links(&self) -> Vec<MagicLinkRequest> {
        self.with(|s| s.magic_links.clone())
    }

    pub fn signed_out_users(&self) -> Vec<String> {
        self.with(|s| s.signed_out_users.clone())
    }
}

impl ProviderHandle for FakeProvider {
    fn open(&self, restored: Option<Session>) -> Arc<dyn SessionProvider> {
        let (events, _) = broadcast::channel(16);
        Arc::new(FakeScope {
            provider: self.clone(),
            session: Mutex::new(restored),
            events,
        })
    }
}

struct FakeScope {
    provider: FakeProvider,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl FakeScope {
    fn record(&self, call: &str) {
        self.provider.with(|s| s.calls.push(call.to_string()));
    }

    fn store(&self, session: Option<Session>, change: SessionChange) {
        *self.session.lock().unwrap() = session.clone();
        let _ = self.events.send(SessionEvent { change, session });
    }
}

fn rejected(status: u16, code: &str, message: &str) -> ProviderError {
    ProviderError::Api {
        status,
        code: Some(code.to_string()),
        message: message.to_string(),
    }
}

#[async_trait]
impl SessionProvider for FakeScope {
    async fn exchange_grant(&self, credential: GrantCredential) -> Result<Session, ProviderError> {
        self.record(&format!("exchange_grant:{}", credential.kind()));
        let session = match credential {
            GrantCredential::Code {
                code,
                code_verifier,
            } => self.provider.with(|s| {
                s.code_verifiers.push(code_verifier);
                s.codes.get(&code).cloned()
            }),
            GrantCredential::Tokens { access_token, .. } => self.provider.with(|s| {
                s.codes
                    .values()
                    .find(|session| session.access_token == access_token)
                    .cloned()
            }),
        }
        .ok_or_else(|| {
            rejected(
                400,
                "flow_state_not_found",
                "invalid flow state, no valid flow state found",
            )
        })?;

        self.store(Some(session.clone()), SessionChange::SignedIn);
        Ok(session)
    }

    async fn verify_one_time_code(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<Session, ProviderError> {
        self.record(&format!("verify_one_time_code:{otp_type}"));
        let session = self
            .provider
            .with(|s| s.otps.get(&(token_hash.to_string(), otp_type)).cloned())
            .ok_or_else(|| rejected(403, "otp_expired", "Email link is invalid or has expired"))?;

        self.store(Some(session.clone()), SessionChange::SignedIn);
        Ok(session)
    }

    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        self.record("current_session");
        let Some(session) = self.session.lock().unwrap().clone() else {
            return Ok(None);
        };

        if self.provider.with(|s| s.revoked.contains(&session.access_token)) {
            self.store(None, SessionChange::SignedOut);
            return Err(rejected(401, "bad_jwt", "invalid JWT"));
        }

        if session.is_expired() {
            if self.provider.with(|s| s.outage) {
                return Err(rejected(503, "service_unavailable", "Service Unavailable"));
            }
            let refreshed = self
                .provider
                .with(|s| s.refreshes.get(&session.refresh_token).cloned());
            return match refreshed {
                Some(refreshed) => {
                    self.store(Some(refreshed.clone()), SessionChange::TokenRefreshed);
                    Ok(Some(refreshed))
                }
                None => {
                    self.store(None, SessionChange::SignedOut);
                    Err(rejected(400, "refresh_token_not_found", "Invalid Refresh Token"))
                }
            };
        }

        Ok(Some(session))
    }

    fn subscribe(&self) -> SessionSubscription {
        SessionSubscription::new(self.events.subscribe())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.record("sign_out");
        let user_id = self
            .session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.user.id.clone());
        self.store(None, SessionChange::SignedOut);

        if self.provider.with(|s| s.fail_sign_out) {
            return Err(rejected(500, "unexpected_failure", "logout failed"));
        }
        if let Some(user_id) = user_id {
            self.provider.with(|s| s.signed_out_users.push(user_id));
        }
        Ok(())
    }

    async fn send_magic_link(
        &self,
        email: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<(), ProviderError> {
        self.record("send_magic_link");
        if email.ends_with("@blocked.example") {
            return Err(rejected(429, "over_email_send_rate_limit", "Email rate limit exceeded"));
        }
        self.provider.with(|s| {
            s.magic_links.push(MagicLinkRequest {
                email: email.to_string(),
                redirect_to: redirect_to.to_string(),
                code_challenge: code_challenge.to_string(),
            })
        });
        Ok(())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError> {
        self.record("sign_in_with_password");
        let session = self
            .provider
            .with(|s| {
                s.passwords
                    .get(&(email.to_string(), password.to_string()))
                    .cloned()
            })
            .ok_or_else(|| rejected(400, "invalid_credentials", "Invalid login credentials"))?;

        self.store(Some(session.clone()), SessionChange::SignedIn);
        Ok(session)
    }
}
