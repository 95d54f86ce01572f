use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use mirror_quickstart::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mirror_quickstart=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("mirror-quickstart v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    if !config.notify_callback_url().starts_with("https://") {
        tracing::warn!(
            "BASE_URL {} is not HTTPS; subscriptions will be refused",
            config.base_url
        );
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state: SharedState = Arc::new(AppState::from_config(config).await?);
    info!("Credential store ready ✓");

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready ✓");
    axum::serve(listener, app).await?;

    Ok(())
}
