//! Authorization-code flow: code → tokens → user id → stored credentials.

use tracing::{info, warn};

use super::provider::{OAuthProvider, TokenSet, UserInfo};
use crate::error::GetCredentialsError;
use crate::store::{CredentialRecord, CredentialStore};

/// Scopes requested on the consent screen.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/glass.timeline",
    "https://www.googleapis.com/auth/glass.location",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// Resolves an authorization code into stored credentials.
pub struct CredentialFlow<'a> {
    provider: &'a dyn OAuthProvider,
    store: &'a CredentialStore,
}

impl<'a> CredentialFlow<'a> {
    pub fn new(provider: &'a dyn OAuthProvider, store: &'a CredentialStore) -> Self {
        Self { provider, store }
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, String> {
        self.provider
            .exchange_code(code)
            .await
            .map_err(|e| e.to_string())
    }

    /// Identity of the token's owner; fails unless it carries a non-empty id.
    pub async fn fetch_user_info(
        &self,
        tokens: &TokenSet,
    ) -> Result<UserInfo, GetCredentialsError> {
        let info = self
            .provider
            .user_info(&tokens.access_token)
            .await
            .map_err(|e| GetCredentialsError::NoUserId(e.to_string()))?;

        match info.id.as_deref() {
            Some(id) if !id.is_empty() => Ok(info),
            _ => Err(GetCredentialsError::NoUserId(
                "userinfo response has no id".into(),
            )),
        }
    }

    pub fn build_authorization_url(&self, user_id: &str, state: &str) -> String {
        self.provider.auth_url(SCOPES, state, Some(user_id))
    }

    /// Run the full flow for a callback carrying `code`.
    ///
    /// Providers only issue a refresh token on first consent, so when the
    /// exchange yields none a previously stored one is reused; with nothing on
    /// file the user must consent again.
    pub async fn get_credentials(
        &self,
        code: &str,
        state: &str,
    ) -> Result<CredentialRecord, GetCredentialsError> {
        let tokens = match self.exchange_code(code).await {
            Ok(tokens) => tokens,
            Err(reason) => {
                warn!("Authorization code exchange failed: {reason}");
                return Err(GetCredentialsError::CodeExchange {
                    authorization_url: self.build_authorization_url("", state),
                    reason,
                });
            }
        };

        let user_info = self.fetch_user_info(&tokens).await?;
        let user_id = user_info.id.unwrap_or_default();

        if let Some(refresh_token) = tokens.refresh_token.as_deref() {
            let record = self
                .store
                .put(
                    &user_id,
                    &tokens.access_token,
                    Some(refresh_token),
                    tokens.expires_at(),
                )
                .await?;
            info!("Stored new credentials for user {user_id}");
            return Ok(record);
        }

        if let Some(stored) = self.store.get(&user_id).await? {
            if stored.refresh_token.is_some() {
                info!("No refresh token issued; reusing stored credentials for user {user_id}");
                return Ok(stored);
            }
        }

        warn!("No refresh token available for user {user_id}; consent required");
        Err(GetCredentialsError::NoRefreshToken {
            authorization_url: self.build_authorization_url(&user_id, state),
        })
    }
}
