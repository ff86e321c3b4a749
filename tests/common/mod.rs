//! Common test utilities for E2E tests

#![allow(dead_code)]

pub mod fake_provider;

use std::sync::Arc;

use axum_extra::extract::CookieJar;
use chrono::Utc;
use hive_platform::auth::session::{Session, User};
use hive_platform::{AppState, config};
use serde_json::{Map, Value};
use tokio::net::TcpListener;

pub use fake_provider::FakeProvider;

/// Public origin every redirect must stay on
pub const ORIGIN: &str = "https://test.example.com";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub provider: FakeProvider,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "test.example.com".to_string(),
                protocol: "https".to_string(),
            },
            provider: config::ProviderConfig {
                url: "https://project.supabase.test".to_string(),
                anon_key: "test-anon-key".to_string(),
                request_timeout_seconds: 5,
            },
            session: config::SessionCookieConfig::default(),
            routes: config::RoutesConfig::default(),
            guard: config::GuardConfig::default(),
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state with the in-memory provider
        let provider = FakeProvider::new();
        let state = AppState::with_provider(config, Arc::new(provider.clone()));

        // Redirects are asserted on, never followed
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = hive_platform::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            provider,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// `Cookie` header value carrying `session` the way the server stores it
    pub fn session_cookie(&self, session: &Session) -> String {
        let jar = self
            .state
            .cookies
            .write_session(CookieJar::new(), session)
            .unwrap();
        jar.iter()
            .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Build a provider session for `user_id`
pub fn session_for(user_id: &str, metadata: Value) -> Session {
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

/// `Location` header of a redirect response
pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .expect("redirect has a Location header")
        .to_str()
        .unwrap()
        .to_string()
}

/// All `Set-Cookie` header values
pub fn set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

/// `Set-Cookie` value for cookie `name`, if the response sets one
pub fn set_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    set_cookies(response)
        .into_iter()
        .find(|value| value.starts_with(&format!("{name}=")))
}
