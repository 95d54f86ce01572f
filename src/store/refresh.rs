//! On-demand access token refresh.
//!
//! Called by the route gate and the notification handler before a facade is
//! built, so remote calls always carry a live access token.

use tracing::{error, info};

use super::db::{CredentialRecord, CredentialStore};
use crate::error::AppError;
use crate::oauth::OAuthProvider;

/// Refresh tokens this close to expiry as well.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// Return `record` unchanged while its access token is live; otherwise
/// refresh it through the provider and persist the new token.
pub async fn fresh_credentials(
    provider: &dyn OAuthProvider,
    store: &CredentialStore,
    record: CredentialRecord,
) -> Result<CredentialRecord, AppError> {
    if !record.expires_within(EXPIRY_LEEWAY_SECS) {
        return Ok(record);
    }

    let Some(refresh_token) = record.refresh_token.as_deref() else {
        return Err(AppError::RefreshFailed(
            "token expired and no refresh token available".into(),
        ));
    };

    let tokens = provider.refresh_token(refresh_token).await.map_err(|e| {
        error!("Failed to refresh token for {}: {e}", record.user_id);
        e
    })?;

    let refreshed = store
        .put(
            &record.user_id,
            &tokens.access_token,
            tokens.refresh_token.as_deref().or(Some(refresh_token)),
            tokens.expires_at(),
        )
        .await?;

    info!("Refreshed access token for {}", record.user_id);
    Ok(refreshed)
}
