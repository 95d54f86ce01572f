use async_trait::async_trait;
use serde::Deserialize;

use super::provider::{OAuthProvider, TokenSet, UserInfo};
use crate::config::ClientSecrets;
use crate::error::AppError;

/// Google OAuth 2.0 provider.
///
/// Refresh tokens are only issued when `access_type=offline` is requested, and
/// only on the first consent unless consent is forced again.
pub struct GoogleProvider {
    secrets: ClientSecrets,
    userinfo_url: String,
    http: reqwest::Client,
}

// Raw token response from Google's token endpoint
#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
}

impl From<GoogleTokenResponse> for TokenSet {
    fn from(resp: GoogleTokenResponse) -> Self {
        TokenSet {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            token_type: resp.token_type.unwrap_or_else(|| "Bearer".into()),
            expires_in: resp.expires_in,
            scope: resp.scope,
        }
    }
}

impl GoogleProvider {
    pub fn new(secrets: ClientSecrets, userinfo_url: String, http: reqwest::Client) -> Self {
        Self {
            secrets,
            userinfo_url,
            http,
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, String> {
        let resp = self
            .http
            .post(&self.secrets.token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("token endpoint returned {status}: {body}"));
        }

        let token_resp: GoogleTokenResponse = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse token response: {e}"))?;

        Ok(token_resp.into())
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn auth_url(&self, scopes: &[&str], state: &str, login_hint: Option<&str>) -> String {
        let scope = scopes.join(" ");
        let mut params = url::form_urlencoded::Serializer::new(String::new());
        params
            .append_pair("client_id", &self.secrets.client_id)
            .append_pair("redirect_uri", &self.secrets.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &scope)
            .append_pair("access_type", "offline")
            .append_pair("approval_prompt", "force");
        if !state.is_empty() {
            params.append_pair("state", state);
        }
        if let Some(hint) = login_hint.filter(|h| !h.is_empty()) {
            params.append_pair("user_id", hint);
        }

        format!("{}?{}", self.secrets.auth_uri, params.finish())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, AppError> {
        self.token_request(&[
            ("code", code),
            ("client_id", &self.secrets.client_id),
            ("client_secret", &self.secrets.client_secret),
            ("redirect_uri", &self.secrets.redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
        .map_err(AppError::Provider)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AppError> {
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("client_id", &self.secrets.client_id),
            ("client_secret", &self.secrets.client_secret),
            ("grant_type", "refresh_token"),
        ])
        .await
        .map_err(AppError::RefreshFailed)
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo, AppError> {
        let resp = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("userinfo request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "userinfo endpoint returned {status}: {body}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| AppError::Provider(format!("failed to parse userinfo response: {e}")))
    }
}
