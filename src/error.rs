use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use serde_json::json;

use crate::mirror::MirrorError;

/// Entry point of the authorization flow.
pub const SIGN_IN_PATH: &str = "/oauth2callback";

/// Unified error type for the quick start web app.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ── Request Errors ──────────────────────────────────────────────────
    /// No session or no stored credentials; the browser must go through consent.
    #[error("Sign-in required")]
    SignInRequired,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    // ── OAuth Errors ────────────────────────────────────────────────────
    #[error("OAuth provider error: {0}")]
    Provider(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    // ── Remote API ──────────────────────────────────────────────────────
    #[error("Mirror API error: {0}")]
    Mirror(#[from] MirrorError),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        AppError::Database(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::SignInRequired => return Redirect::to(SIGN_IN_PATH).into_response(),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            AppError::RefreshFailed(_) => (StatusCode::BAD_GATEWAY, "refresh_failed"),
            AppError::Mirror(MirrorError::Unauthorized) => {
                (StatusCode::UNAUTHORIZED, "mirror_unauthorized")
            }
            AppError::Mirror(_) => (StatusCode::BAD_GATEWAY, "mirror_error"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Outcome of the authorization-code flow when no usable credentials result.
///
/// The two redirecting variants carry the consent URL the caller must send
/// the browser to; nothing is raised past the callback handler.
#[derive(Debug, thiserror::Error)]
pub enum GetCredentialsError {
    #[error("authorization code exchange failed: {reason}")]
    CodeExchange {
        authorization_url: String,
        reason: String,
    },

    #[error("no refresh token issued and none stored")]
    NoRefreshToken { authorization_url: String },

    #[error("user info lookup failed: {0}")]
    NoUserId(String),

    #[error(transparent)]
    Storage(#[from] AppError),
}

impl GetCredentialsError {
    /// Consent URL to redirect to, when the flow can be restarted.
    pub fn redirect_url(&self) -> Option<&str> {
        match self {
            GetCredentialsError::CodeExchange {
                authorization_url, ..
            }
            | GetCredentialsError::NoRefreshToken { authorization_url } => {
                Some(authorization_url.as_str())
            }
            _ => None,
        }
    }
}
