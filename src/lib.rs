pub mod api;
pub mod config;
pub mod error;
pub mod mirror;
pub mod oauth;
pub mod session;
pub mod store;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{AppError, GetCredentialsError};

use std::sync::Arc;
use std::time::Duration;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub config: Config,
    pub store: store::CredentialStore,
    pub oauth: Box<dyn oauth::OAuthProvider>,
    pub mirror: Box<dyn mirror::MirrorConnector>,
    pub sessions: session::SessionSigner,
    /// Plain client for fetching attachment media from user-supplied URLs.
    pub http: reqwest::Client,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire up the production components from configuration.
    pub async fn from_config(config: Config) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;

        let store = store::CredentialStore::init(&config.database_url).await?;
        let sessions = session::SessionSigner::new(&config.session_secret)?;
        let oauth = oauth::GoogleProvider::new(
            config.client.clone(),
            config.userinfo_url.clone(),
            http.clone(),
        );
        let mirror = mirror::HttpMirrorConnector::new(
            http.clone(),
            config.mirror_api_base.clone(),
            config.mirror_upload_base.clone(),
        );

        Ok(Self {
            config,
            store,
            oauth: Box::new(oauth),
            mirror: Box::new(mirror),
            sessions,
            http,
        })
    }
}
