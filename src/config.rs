//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::net::IpAddr;

use crate::auth::redirect::is_path_absolute;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub session: SessionCookieConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "members.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the platform
    ///
    /// # Returns
    /// Full URL like "https://members.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// Public origin every redirect `Location` is resolved against.
    ///
    /// Request headers (`Host`, `X-Forwarded-Host`, `Origin`) never take part.
    pub fn public_origin(&self) -> Result<url::Url, crate::error::AppError> {
        url::Url::parse(&self.base_url()).map_err(|e| {
            crate::error::AppError::Config(format!("server.domain is not a valid origin: {e}"))
        })
    }
}

/// Hosted identity provider (GoTrue-compatible) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Project URL (e.g., "https://project.supabase.co")
    pub url: String,
    /// Public anon key, sent as the `apikey` header
    pub anon_key: String,
    /// Per-request timeout in seconds (default: 10)
    #[serde(default = "default_provider_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_provider_timeout() -> u64 {
    10
}

/// Session cookie shape
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCookieConfig {
    /// Base cookie name; chunks are stored as `<name>.0`, `<name>.1`, ...
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Maximum length of a single cookie value before chunking
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

impl Default for SessionCookieConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

fn default_cookie_name() -> String {
    "sb-auth-token".to_string()
}

fn default_max_chunk_size() -> usize {
    3180
}

/// Smallest chunk size whose 16 chunks still hold a session with metadata
const MIN_CHUNK_SIZE: usize = 1024;

/// Well-known paths the auth flows navigate between
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoutesConfig {
    /// Public landing page
    pub landing: String,
    /// Public sign-in page
    pub login: String,
    /// Member dashboard
    pub dashboard: String,
    /// Member settings (profile completion happens here)
    pub settings: String,
    /// Every path at or below this prefix requires a session
    pub protected_prefix: String,
    /// Server-side grant callback
    pub callback: String,
    /// Link-initiated signout
    pub signout: String,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            landing: "/".to_string(),
            login: "/login".to_string(),
            dashboard: "/platform".to_string(),
            settings: "/platform/settings".to_string(),
            protected_prefix: "/platform".to_string(),
            callback: "/auth/callback".to_string(),
            signout: "/auth/signout".to_string(),
        }
    }
}

impl RoutesConfig {
    /// Whether `path` is inside the protected area
    pub fn is_protected(&self, path: &str) -> bool {
        let prefix = self.protected_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return path.starts_with('/');
        }
        path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Session guard configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// How long the guard waits for the initial session read (default: 2000)
    #[serde(default = "default_session_read_timeout_ms")]
    pub session_read_timeout_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            session_read_timeout_ms: default_session_read_timeout_ms(),
        }
    }
}

impl GuardConfig {
    pub fn session_read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.session_read_timeout_ms)
    }
}

fn default_session_read_timeout_ms() -> u64 {
    2000
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (HIVE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("provider.request_timeout_seconds", 10)?
            .set_default("session.cookie_name", "sb-auth-token")?
            .set_default("session.max_chunk_size", 3180)?
            .set_default("guard.session_read_timeout_ms", 2000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (HIVE__*)
            .add_source(
                Environment::with_prefix("HIVE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
            || !is_local_server_domain(&self.server.domain)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        let provider_url = url::Url::parse(&self.provider.url)
            .map_err(|e| AppError::Config(format!("provider.url is invalid: {e}")))?;
        if !matches!(provider_url.scheme(), "http" | "https") {
            return Err(AppError::Config(
                "provider.url must use http or https".to_string(),
            ));
        }

        if self.provider.anon_key.trim().is_empty() {
            return Err(AppError::Config(
                "provider.anon_key must not be empty".to_string(),
            ));
        }

        if self.session.cookie_name.trim().is_empty() {
            return Err(AppError::Config(
                "session.cookie_name must not be empty".to_string(),
            ));
        }

        if self.session.max_chunk_size < MIN_CHUNK_SIZE {
            return Err(AppError::Config(format!(
                "session.max_chunk_size must be at least {MIN_CHUNK_SIZE}"
            )));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(AppError::Config(
                "logging.format must be \"pretty\" or \"json\"".to_string(),
            ));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(AppError::Config(format!(
                "logging.level \"{}\" is not a tracing level",
                self.logging.level
            )));
        }

        let routes = [
            ("routes.landing", &self.routes.landing),
            ("routes.login", &self.routes.login),
            ("routes.dashboard", &self.routes.dashboard),
            ("routes.settings", &self.routes.settings),
            ("routes.protected_prefix", &self.routes.protected_prefix),
            ("routes.callback", &self.routes.callback),
            ("routes.signout", &self.routes.signout),
        ];
        for (key, path) in routes {
            if !is_path_absolute(path) {
                return Err(AppError::Config(format!(
                    "{key} must be a path starting with a single '/'"
                )));
            }
        }

        for (key, path) in [
            ("routes.dashboard", &self.routes.dashboard),
            ("routes.settings", &self.routes.settings),
        ] {
            if !self.routes.is_protected(path) {
                return Err(AppError::Config(format!(
                    "{key} must be inside routes.protected_prefix"
                )));
            }
        }

        if self.routes.is_protected(&self.routes.login) {
            return Err(AppError::Config(
                "routes.login must not be inside routes.protected_prefix".to_string(),
            ));
        }

        self.server.public_origin()?;

        let https = self.server.protocol.eq_ignore_ascii_case("https");
        if self.should_use_secure_cookies() && !https {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: "localhost:8080".to_string(),
                protocol: "http".to_string(),
            },
            provider: ProviderConfig {
                url: "https://project.supabase.co".to_string(),
                anon_key: "anon-key".to_string(),
                request_timeout_seconds: 10,
            },
            session: SessionCookieConfig::default(),
            routes: RoutesConfig::default(),
            guard: GuardConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_http_on_localhost() {
        let config = valid_config();
        assert!(config.validate().is_ok());
        assert!(!config.should_use_secure_cookies());
        assert_eq!(config.server.base_url(), "http://localhost:8080");
    }

    #[test]
    fn validate_rejects_http_for_non_local_domain() {
        let mut config = valid_config();
        config.server.domain = "members.example.com".to_string();

        let error = config
            .validate()
            .expect_err("public domains must require https");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("server.protocol must be https")
        ));
    }

    #[test]
    fn validate_rejects_empty_anon_key() {
        let mut config = valid_config();
        config.provider.anon_key = "  ".to_string();

        let error = config.validate().expect_err("anon key is required");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("provider.anon_key")
        ));
    }

    #[test]
    fn validate_rejects_non_path_routes() {
        let mut config = valid_config();
        config.routes.login = "https://evil.example/login".to_string();

        let error = config.validate().expect_err("routes must be paths");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("routes.login")
        ));
    }

    #[test]
    fn validate_rejects_settings_outside_protected_area() {
        let mut config = valid_config();
        config.routes.settings = "/settings".to_string();

        let error = config.validate().expect_err("settings must be protected");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("routes.settings")
        ));
    }

    #[test]
    fn validate_rejects_tiny_cookie_chunks() {
        let mut config = valid_config();
        config.session.max_chunk_size = 100;

        let error = config.validate().expect_err("chunks must hold a session");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("session.max_chunk_size")
        ));
    }

    #[test]
    fn validate_rejects_unknown_log_level() {
        let mut config = valid_config();
        config.logging.level = "loud".to_string();

        let error = config.validate().expect_err("level must parse");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("logging.level")
        ));
    }

    #[test]
    fn protected_area_matches_prefix_boundaries() {
        let routes = RoutesConfig::default();
        assert!(routes.is_protected("/platform"));
        assert!(routes.is_protected("/platform/settings"));
        assert!(routes.is_protected("/platform/sites/42"));
        assert!(!routes.is_protected("/platformer"));
        assert!(!routes.is_protected("/login"));
        assert!(!routes.is_protected("/"));
    }
}
