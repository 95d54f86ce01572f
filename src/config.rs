use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
pub const DEFAULT_MIRROR_API_BASE: &str = "https://www.googleapis.com/mirror/v1";
pub const DEFAULT_MIRROR_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/mirror/v1";

/// Application configuration, loaded from environment variables and the
/// client secrets JSON file.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    /// Public base URL; the notification callback and demo image URLs hang off it.
    pub base_url: String,

    // ── Storage ─────────────────────────────────────────────────────────
    pub database_url: String,

    // ── Session ─────────────────────────────────────────────────────────
    /// Base64-encoded HMAC key (at least 32 bytes) for signing the session cookie.
    pub session_secret: String,

    // ── OAuth / Mirror ──────────────────────────────────────────────────
    pub client: ClientSecrets,
    pub userinfo_url: String,
    pub mirror_api_base: String,
    pub mirror_upload_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let secrets_path = std::env::var("CLIENT_SECRETS_PATH")
            .unwrap_or_else(|_| "client_secrets.json".into());

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "4567".into())
                .parse()
                .context("Invalid PORT")?,
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:4567".into()),

            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://credentials.sqlite".into()),

            session_secret: std::env::var("SESSION_SECRET")
                .context("SESSION_SECRET is required (32+ bytes, base64)")?,

            client: ClientSecrets::from_file(&secrets_path)?,
            userinfo_url: std::env::var("USERINFO_URL")
                .unwrap_or_else(|_| DEFAULT_USERINFO_URL.into()),
            mirror_api_base: std::env::var("MIRROR_API_BASE")
                .unwrap_or_else(|_| DEFAULT_MIRROR_API_BASE.into()),
            mirror_upload_base: std::env::var("MIRROR_UPLOAD_BASE")
                .unwrap_or_else(|_| DEFAULT_MIRROR_UPLOAD_BASE.into()),
        })
    }

    /// URL the Mirror API posts notifications to.
    pub fn notify_callback_url(&self) -> String {
        format!("{}/notify-callback", self.base_url.trim_end_matches('/'))
    }

    /// Absolute URL of a static asset served next to the app.
    pub fn static_url(&self, path: &str) -> String {
        format!("{}/static/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// OAuth client registration as downloaded from the Google Cloud Console.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct SecretsFile {
    web: Option<SecretsSection>,
    installed: Option<SecretsSection>,
    #[serde(flatten)]
    flat: Option<SecretsSection>,
}

#[derive(Debug, Deserialize)]
struct SecretsSection {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl ClientSecrets {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read client secrets from {}", path.display()))?;
        Self::from_json(&content)
    }

    /// Parses either the console layout (`web` / `installed` section) or a flat object.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: SecretsFile =
            serde_json::from_str(json).context("Failed to parse client secrets JSON")?;

        let section = file
            .web
            .or(file.installed)
            .or(file.flat)
            .context("client secrets must contain a 'web' or 'installed' section, or client_id/client_secret at the root")?;

        let redirect_uri = section
            .redirect_uris
            .into_iter()
            .next()
            .context("client secrets must list at least one redirect URI")?;

        Ok(ClientSecrets {
            client_id: section.client_id,
            client_secret: section.client_secret,
            redirect_uri,
            auth_uri: section.auth_uri.unwrap_or_else(|| DEFAULT_AUTH_URI.into()),
            token_uri: section.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.into()),
        })
    }
}
