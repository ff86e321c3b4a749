//! GoTrue (Supabase Auth) REST client
//!
//! Talks to `<project>/auth/v1/...`. Each [`GoTrueClient`] is one provider
//! scope: it stores a session, broadcasts changes to subscribers and shares
//! the HTTP client and credentials of the [`GoTrueHandle`] that opened it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{RwLock, broadcast};
use url::Url;

use super::{
    GrantCredential, OtpType, ProviderError, ProviderHandle, SessionProvider, SessionSubscription,
};
use crate::auth::session::{Session, SessionChange, SessionEvent, User};
use crate::config::ProviderConfig;

/// Broadcast channel capacity for session change events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct GoTrueShared {
    http: reqwest::Client,
    base_url: Url,
}

/// Process-wide GoTrue handle
///
/// Cheap to clone; every scope it opens reuses one connection pool.
#[derive(Clone)]
pub struct GoTrueHandle {
    shared: Arc<GoTrueShared>,
}

impl std::fmt::Debug for GoTrueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoTrueHandle")
            .field("base_url", &self.shared.base_url)
            .field("api_key", &"***")
            .finish()
    }
}

impl GoTrueHandle {
    /// Build the handle from provider configuration
    ///
    /// # Errors
    /// Returns error if the project URL or API key is unusable
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let base = config.url.trim_end_matches('/');
        let base_url = Url::parse(&format!("{base}/auth/v1"))
            .map_err(|e| ProviderError::InvalidConfig(format!("invalid provider url: {e}")))?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            "apikey",
            HeaderValue::from_str(&config.anon_key)
                .map_err(|e| ProviderError::InvalidConfig(format!("invalid API key header: {e}")))?,
        );
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(concat!("hive-platform/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            shared: Arc::new(GoTrueShared { http, base_url }),
        })
    }

    /// Open a scope directly, without going through the trait object
    pub fn client(&self, restored: Option<Session>) -> GoTrueClient {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        GoTrueClient {
            shared: Arc::clone(&self.shared),
            session: RwLock::new(restored),
            events,
        }
    }
}

impl ProviderHandle for GoTrueHandle {
    fn open(&self, restored: Option<Session>) -> Arc<dyn SessionProvider> {
        Arc::new(self.client(restored))
    }
}

/// One GoTrue provider scope
pub struct GoTrueClient {
    shared: Arc<GoTrueShared>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl GoTrueClient {
    fn url(&self, path: &str) -> Url {
        let mut url = self.shared.base_url.clone();
        let current = url.path().to_string();
        // path may contain query string (e.g. "/token?grant_type=pkce")
        if let Some(query_start) = path.find('?') {
            url.set_path(&format!("{}{}", current, &path[..query_start]));
            url.set_query(Some(&path[query_start + 1..]));
        } else {
            url.set_path(&format!("{}{}", current, path));
        }
        url
    }

    async fn store_session(&self, session: &Session, change: SessionChange) {
        *self.session.write().await = Some(session.clone());
        let _ = self.events.send(SessionEvent {
            change,
            session: Some(session.clone()),
        });
    }

    async fn emit_signed_out(&self) {
        *self.session.write().await = None;
        let _ = self.events.send(SessionEvent {
            change: SessionChange::SignedOut,
            session: None,
        });
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        let resp = self
            .shared
            .http
            .post(self.url("/token?grant_type=refresh_token"))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        session_from_response(resp).await
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, ProviderError> {
        let resp = self
            .shared
            .http
            .get(self.url("/user"))
            .bearer_auth(access_token)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        resp.json::<User>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    /// Adopt an implicit-grant token pair
    ///
    /// The access token is validated by fetching its user; an already
    /// expired token is refreshed first.
    async fn adopt_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Session, ProviderError> {
        let expires_at = jwt_expiry(access_token);
        if expires_at.is_some_and(|at| at <= Utc::now().timestamp()) {
            tracing::debug!("Implicit access token already expired; refreshing");
            return self.refresh(refresh_token).await;
        }

        let user = self.fetch_user(access_token).await?;
        Ok(Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at,
            user,
        })
    }
}

#[async_trait]
impl SessionProvider for GoTrueClient {
    async fn exchange_grant(&self, credential: GrantCredential) -> Result<Session, ProviderError> {
        let session = match credential {
            GrantCredential::Tokens {
                access_token,
                refresh_token,
            } => self.adopt_tokens(&access_token, &refresh_token).await?,
            GrantCredential::Code {
                code,
                code_verifier,
            } => {
                let mut body = json!({ "auth_code": code });
                if let Some(verifier) = code_verifier {
                    body["code_verifier"] = json!(verifier);
                }
                let resp = self
                    .shared
                    .http
                    .post(self.url("/token?grant_type=pkce"))
                    .json(&body)
                    .send()
                    .await?;
                session_from_response(resp).await?
            }
        };

        self.store_session(&session, SessionChange::SignedIn).await;
        Ok(session)
    }

    async fn verify_one_time_code(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<Session, ProviderError> {
        let resp = self
            .shared
            .http
            .post(self.url("/verify"))
            .json(&json!({ "token_hash": token_hash, "type": otp_type.as_str() }))
            .send()
            .await?;
        let session = session_from_response(resp).await?;
        self.store_session(&session, SessionChange::SignedIn).await;
        Ok(session)
    }

    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        let stored = self.session.read().await.clone();
        let Some(session) = stored else {
            return Ok(None);
        };

        if !session.is_expired() {
            return Ok(Some(session));
        }

        match self.refresh(&session.refresh_token).await {
            Ok(refreshed) => {
                self.store_session(&refreshed, SessionChange::TokenRefreshed)
                    .await;
                Ok(Some(refreshed))
            }
            Err(error) if error.is_transient() => {
                tracing::warn!(%error, user_id = %session.user.id, "Session refresh unavailable");
                Err(error)
            }
            Err(error) => {
                tracing::warn!(%error, user_id = %session.user.id, "Session refresh rejected");
                self.emit_signed_out().await;
                Err(error)
            }
        }
    }

    fn subscribe(&self) -> SessionSubscription {
        SessionSubscription::new(self.events.subscribe())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let stored = self.session.read().await.clone();
        let Some(session) = stored else {
            return Ok(());
        };

        let result = match self
            .shared
            .http
            .post(self.url("/logout?scope=global"))
            .bearer_auth(&session.access_token)
            .send()
            .await
        {
            Ok(resp) => check_status(resp).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };

        // The local session is gone whatever the provider said.
        self.emit_signed_out().await;
        result
    }

    async fn send_magic_link(
        &self,
        email: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<(), ProviderError> {
        let mut url = self.url("/otp");
        url.query_pairs_mut().append_pair("redirect_to", redirect_to);

        let resp = self
            .shared
            .http
            .post(url)
            .json(&json!({
                "email": email,
                "code_challenge": code_challenge,
                "code_challenge_method": "s256",
            }))
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError> {
        let resp = self
            .shared
            .http
            .post(self.url("/token?grant_type=password"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let session = session_from_response(resp).await?;
        self.store_session(&session, SessionChange::SignedIn).await;
        Ok(session)
    }
}

/// GoTrue token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        let expires_at = token
            .expires_at
            .or_else(|| token.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: token.user,
        }
    }
}

/// GoTrue error body; field names differ between API versions
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_code: Option<String>,
    code: Option<serde_json::Value>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl ErrorBody {
    fn into_error(self, status: u16) -> ProviderError {
        let code = self
            .error_code
            .or_else(|| self.code.and_then(|c| c.as_str().map(ToOwned::to_owned)))
            .or_else(|| self.error.clone());
        let message = self
            .error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .unwrap_or_else(|| format!("Identity provider returned status {status}"));
        ProviderError::Api {
            status,
            code,
            message,
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status().as_u16();
    if status < 400 {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let error = parsed.into_error(status);
    tracing::debug!(status, error = %error, "Identity provider rejected request");
    Err(error)
}

async fn session_from_response(resp: reqwest::Response) -> Result<Session, ProviderError> {
    let resp = check_status(resp).await?;
    let token: TokenResponse = resp
        .json()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    Ok(token.into())
}

/// `exp` claim of a JWT, without verifying the signature
///
/// The provider verifies the token when it is used; this only decides
/// whether to refresh before trying.
fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}
