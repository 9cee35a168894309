//! Signed cookie sessions.
//!
//! The session record travels in a single cookie whose value is
//! `base64url(json).hex(hmac_sha256(secret, base64url(json)))`. Anything that
//! fails to decode, verify, parse, or validate loads as an empty session.

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::utils::signature;
use uuid::Uuid;
use validator::Validate;

use crate::config::SessionConfig;
use crate::models::User;

/// Upper bound on a cookie value, written or accepted, well under browser limits.
const MAX_COOKIE_LEN: usize = 4096;

/// Error message carried across the redirect after a failed login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AuthErrorMessage {
    #[validate(length(min = 1, max = 512))]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub user: Option<User>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 64))]
    pub strategy: Option<String>,

    /// Pending OAuth `state` for an in-flight challenge.
    #[serde(rename = "oauth2:state", default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<Uuid>,

    #[serde(rename = "auth:error", default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub auth_error: Option<AuthErrorMessage>,
}

impl Session {
    pub fn set_user(&mut self, user: User) {
        self.user = Some(user);
        self.oauth_state = None;
        self.auth_error = None;
    }

    pub fn flash_error(&mut self, message: impl Into<String>) {
        self.auth_error = Some(AuthErrorMessage {
            message: message.into(),
        });
    }

    /// Remove and return the pending error message.
    pub fn take_error(&mut self) -> Option<String> {
        self.auth_error.take().map(|e| e.message)
    }

    pub fn clear(&mut self) {
        *self = Session::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Session::default()
    }
}

/// Reads and writes [`Session`] records as signed cookies.
#[derive(Clone)]
pub struct SessionStore {
    cookie_name: String,
    secret: Secret<String>,
    secure: bool,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            secret: config.secret.clone(),
            secure: config.secure,
        }
    }

    /// Load the session from request headers. Never fails.
    pub fn load(&self, headers: &HeaderMap) -> Session {
        let jar = CookieJar::from_headers(headers);
        let Some(cookie) = jar.get(&self.cookie_name) else {
            return Session::default();
        };

        match self.decode(cookie.value()) {
            Ok(session) => session,
            Err(reason) => {
                tracing::warn!(reason, "Discarding invalid session cookie");
                Session::default()
            }
        }
    }

    /// Cookie carrying `session`. An empty session yields a removal cookie.
    pub fn commit(&self, session: &Session) -> Result<Cookie<'static>, anyhow::Error> {
        if session.is_empty() {
            return Ok(self.destroy());
        }
        let value = self.encode(session)?;
        Ok(self.build_cookie(value))
    }

    /// Expired cookie that removes the session from the browser.
    pub fn destroy(&self) -> Cookie<'static> {
        let mut cookie = self.build_cookie(String::new());
        cookie.set_max_age(time::Duration::ZERO);
        cookie
    }

    fn build_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build()
    }

    fn encode(&self, session: &Session) -> Result<String, anyhow::Error> {
        let json = serde_json::to_vec(session)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let mac = signature::sign(self.secret.expose_secret().as_bytes(), &payload)?;
        let value = format!("{}.{}", payload, mac);
        if value.len() > MAX_COOKIE_LEN {
            anyhow::bail!(
                "session cookie is {} bytes, limit is {}",
                value.len(),
                MAX_COOKIE_LEN
            );
        }
        Ok(value)
    }

    fn decode(&self, value: &str) -> Result<Session, &'static str> {
        if value.len() > MAX_COOKIE_LEN {
            return Err("oversized");
        }

        let (payload, mac) = value.rsplit_once('.').ok_or("missing signature")?;

        let valid = signature::verify(self.secret.expose_secret().as_bytes(), payload, mac)
            .map_err(|_| "signature check failed")?;
        if !valid {
            return Err("bad signature");
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| "invalid encoding")?;
        let session: Session = serde_json::from_slice(&json).map_err(|_| "invalid payload")?;
        session.validate().map_err(|_| "schema validation failed")?;
        Ok(session)
    }
}
