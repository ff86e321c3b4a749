//! HIVE member platform - sign-in completion and session guarding
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP Layer (Axum)                       │
//! │  - Sign-in page, callback and signout endpoints             │
//! │  - Member area behind the route guard                       │
//! │  - Metrics                                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Auth Core                             │
//! │  - Grant parser, redirect policy, guard decision            │
//! │  - Client exchanger / guard / signout                       │
//! │  - Session cookies                                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Identity Provider                         │
//! │  - GoTrue REST API (hosted)                                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: Member area pages and metrics
//! - `auth`: Grant handling, session guarding, provider client
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Holds no session data: every request opens its own provider scope
/// from its cookies.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Process-wide identity provider handle
    pub provider: Arc<dyn auth::ProviderHandle>,

    /// Session cookie codec
    pub cookies: auth::SessionCookies,
}

impl AppState {
    /// Initialize application state with the GoTrue provider
    ///
    /// # Errors
    /// Returns error if the provider handle cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let provider = auth::GoTrueHandle::new(&config.provider)?;
        tracing::info!(provider_url = %config.provider.url, "Identity provider configured");

        Ok(Self::with_provider(config, Arc::new(provider)))
    }

    /// Initialize application state with any provider implementation
    pub fn with_provider(
        config: config::AppConfig,
        provider: Arc<dyn auth::ProviderHandle>,
    ) -> Self {
        let cookies = auth::SessionCookies::from_config(&config);
        Self {
            config: Arc::new(config),
            provider,
            cookies,
        }
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(auth::auth_router(&state.config.routes))
        .merge(api::platform_router(state.clone()))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn not_found() -> error::AppError {
    error::AppError::NotFound
}
