//! Per-request session carried in an HMAC-signed cookie.
//!
//! The cookie value is `base64url(hmac || json)`. It holds the signed-in user
//! id and a one-shot flash message that `GET /` reads and clears.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::AppError;
use crate::SharedState;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "mirror_session";

const SIGNATURE_LEN: usize = 32;

/// Browser session state, extracted per request and written back via `Set-Cookie`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Session {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            message: None,
        }
    }

    /// Set the flash message shown on the next dashboard render.
    pub fn flash(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Read-once: returns the flash message and clears it from the session.
    pub fn take_message(&mut self) -> Option<String> {
        self.message.take()
    }
}

/// Signs and verifies session cookie values.
pub struct SessionSigner {
    key: Vec<u8>,
}

fn new_hmac(key: &[u8]) -> Result<HmacSha256, AppError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| AppError::Internal(format!("HMAC init failed: {e}")))
}

impl SessionSigner {
    /// Create a signer from a base64-encoded secret of at least 32 bytes.
    pub fn new(secret_b64: &str) -> Result<Self, AppError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(secret_b64)
            .map_err(|e| AppError::Config(format!("Invalid SESSION_SECRET base64: {e}")))?;

        if key.len() < 32 {
            return Err(AppError::Config(format!(
                "SESSION_SECRET must be at least 32 bytes, got {}",
                key.len()
            )));
        }

        Ok(Self { key })
    }

    pub fn sign(&self, session: &Session) -> Result<String, AppError> {
        let payload = serde_json::to_vec(session)
            .map_err(|e| AppError::Internal(format!("Failed to encode session: {e}")))?;

        let mut mac = new_hmac(&self.key)?;
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(&payload);

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Verify a cookie value; `None` if it is malformed or the signature does not match.
    pub fn verify(&self, signed: &str) -> Option<Session> {
        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .ok()?;

        if combined.len() < SIGNATURE_LEN {
            return None;
        }

        let (signature, payload) = combined.split_at(SIGNATURE_LEN);

        let mut mac = new_hmac(&self.key).ok()?;
        mac.update(payload);
        mac.verify_slice(signature).ok()?;

        serde_json::from_slice(payload).ok()
    }

    /// `Set-Cookie` header persisting `session`.
    pub fn cookie(&self, session: &Session) -> Result<[(HeaderName, String); 1], AppError> {
        let value = self.sign(session)?;
        Ok([(
            SET_COOKIE,
            format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax"),
        )])
    }

    /// `Set-Cookie` header that drops the session.
    pub fn clear_cookie(&self) -> [(HeaderName, String); 1] {
        [(
            SET_COOKIE,
            format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
        )]
    }
}

/// Find a cookie value by name in the request headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

impl FromRequestParts<SharedState> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let Some(raw) = cookie_value(&parts.headers, SESSION_COOKIE) else {
            return Ok(Session::default());
        };

        match state.sessions.verify(raw) {
            Some(session) => Ok(session),
            None => {
                tracing::warn!("Discarding session cookie with invalid signature");
                Ok(Session::default())
            }
        }
    }
}
