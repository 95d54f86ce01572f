use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A set of tokens returned from an OAuth provider after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl TokenSet {
    pub fn expires_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.expires_in
            .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs as i64))
    }
}

/// Identity of the user who granted access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// The identity provider the app authorizes against.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Build the consent-screen URL the browser should be redirected to.
    ///
    /// - `scopes`: the OAuth scopes to request.
    /// - `state`: opaque value echoed back on the callback.
    /// - `login_hint`: user id to preselect, when known.
    fn auth_url(&self, scopes: &[&str], state: &str, login_hint: Option<&str>) -> String;

    /// Exchange an authorization code for an access token (and optionally refresh token).
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, AppError>;

    /// Refresh an expired access token using a refresh token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AppError>;

    /// Look up who the access token belongs to.
    async fn user_info(&self, access_token: &str) -> Result<UserInfo, AppError>;
}
