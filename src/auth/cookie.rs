//! Session cookie storage
//!
//! The session is stored as `base64-<base64url(JSON)>`. Values longer than
//! the configured chunk size are split across `<name>.0`, `<name>.1`, ...
//! and joined again on read. The PKCE verifier sits in its own
//! `<name>-code-verifier` cookie between sign-in start and callback.

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use super::session::Session;
use crate::config::AppConfig;

const VALUE_PREFIX: &str = "base64-";

/// Upper bound on chunks written, read and cleared
const MAX_CHUNKS: usize = 16;

/// Cookie codec for one configured cookie name
#[derive(Debug, Clone)]
pub struct SessionCookies {
    name: String,
    max_chunk_size: usize,
    secure: bool,
}

impl SessionCookies {
    pub fn new(name: impl Into<String>, max_chunk_size: usize, secure: bool) -> Self {
        Self {
            name: name.into(),
            max_chunk_size: max_chunk_size.max(1),
            secure,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.session.cookie_name.clone(),
            config.session.max_chunk_size,
            config.should_use_secure_cookies(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn chunk_name(&self, index: usize) -> String {
        format!("{}.{index}", self.name)
    }

    fn verifier_name(&self) -> String {
        format!("{}-code-verifier", self.name)
    }

    fn build(&self, name: String, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build()
    }

    fn removal(&self, name: String) -> Cookie<'static> {
        let mut cookie = Cookie::build((name, "".to_string()))
            .path("/")
            .http_only(true)
            .build();
        cookie.make_removal();
        cookie
    }

    fn raw_value(&self, jar: &CookieJar) -> Option<String> {
        if let Some(cookie) = jar.get(&self.name) {
            return Some(cookie.value().to_string());
        }

        let mut joined = String::new();
        for index in 0..MAX_CHUNKS {
            match jar.get(&self.chunk_name(index)) {
                Some(chunk) => joined.push_str(chunk.value()),
                None => break,
            }
        }
        (!joined.is_empty()).then_some(joined)
    }

    /// Session stored in the request cookies, if any decodes
    pub fn read_session(&self, jar: &CookieJar) -> Option<Session> {
        let raw = self.raw_value(jar)?;
        match decode(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    cookie = %self.name,
                    "Ignoring undecodable session cookie"
                );
                None
            }
        }
    }

    /// Store `session`, replacing whatever shape was there before
    ///
    /// # Errors
    /// Fails if the session would need more chunks than are read back.
    pub fn write_session(&self, jar: CookieJar, session: &Session) -> anyhow::Result<CookieJar> {
        let value = encode(session)?;
        let needed = value.len().div_ceil(self.max_chunk_size);
        if needed > MAX_CHUNKS {
            anyhow::bail!(
                "session needs {needed} cookies of {} bytes, at most {MAX_CHUNKS} are read back",
                self.max_chunk_size
            );
        }
        let mut jar = self.remove_all(jar);

        if value.len() <= self.max_chunk_size {
            return Ok(jar.add(self.build(self.name.clone(), value)));
        }

        // Encoded value is ASCII, byte offsets are char boundaries.
        let chunks: Vec<&str> = value
            .as_bytes()
            .chunks(self.max_chunk_size)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
            .collect();
        for (index, chunk) in chunks.into_iter().enumerate() {
            jar = jar.add(self.build(self.chunk_name(index), chunk.to_string()));
        }
        Ok(jar)
    }

    /// Remove the session cookie and every chunk present
    pub fn clear_session(&self, jar: CookieJar) -> CookieJar {
        self.remove_all(jar)
    }

    fn remove_all(&self, mut jar: CookieJar) -> CookieJar {
        if jar.get(&self.name).is_some() {
            jar = jar.remove(self.removal(self.name.clone()));
        }
        for index in 0..MAX_CHUNKS {
            let name = self.chunk_name(index);
            if jar.get(&name).is_some() {
                jar = jar.remove(self.removal(name));
            }
        }
        jar
    }

    pub fn read_code_verifier(&self, jar: &CookieJar) -> Option<String> {
        jar.get(&self.verifier_name())
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn write_code_verifier(&self, jar: CookieJar, verifier: &str) -> CookieJar {
        jar.add(self.build(self.verifier_name(), verifier.to_string()))
    }

    pub fn clear_code_verifier(&self, jar: CookieJar) -> CookieJar {
        let name = self.verifier_name();
        if jar.get(&name).is_some() {
            jar.remove(self.removal(name))
        } else {
            jar
        }
    }
}

fn encode(session: &Session) -> anyhow::Result<String> {
    let json = serde_json::to_vec(session)?;
    Ok(format!("{VALUE_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
}

fn decode(raw: &str) -> anyhow::Result<Session> {
    let json = match raw.strip_prefix(VALUE_PREFIX) {
        Some(encoded) => URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('='))?,
        None => urlencoding::decode(raw)?.into_owned().into_bytes(),
    };
    Ok(serde_json::from_slice(&json)?)
}
