//! Insert one card for every user with stored credentials.

use tracing::{info, warn};

use crate::error::AppError;
use crate::mirror::TimelineItem;
use crate::store::fresh_credentials;
use crate::AppState;

/// Refuse to broadcast beyond this many users.
pub const MAX_FANOUT_USERS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum FanOut {
    Aborted { users: usize },
    Sent { delivered: usize, failed: usize },
}

impl FanOut {
    /// Flash message shown on the dashboard.
    pub fn message(&self) -> String {
        match self {
            FanOut::Aborted { users } => format!(
                "Found {users} users. Aborting to save your number of requests."
            ),
            FanOut::Sent { delivered, failed: 0 } => {
                format!("Successfully sent cards to {delivered} users.")
            }
            FanOut::Sent { delivered, failed } => format!(
                "Successfully sent cards to {delivered} users ({failed} failed)."
            ),
        }
    }
}

/// Insert `item` for every stored user, or nothing when there are too many.
///
/// Per-user failures are logged and counted; storage failures abort the run.
pub async fn insert_for_all_users(
    state: &AppState,
    item: &TimelineItem,
) -> Result<FanOut, AppError> {
    let user_ids = state.store.list_user_ids().await?;

    if user_ids.len() > MAX_FANOUT_USERS {
        warn!("Refusing to fan out to {} users", user_ids.len());
        return Ok(FanOut::Aborted {
            users: user_ids.len(),
        });
    }

    let mut delivered = 0;
    let mut failed = 0;

    for user_id in user_ids {
        let Some(record) = state.store.get(&user_id).await? else {
            continue;
        };

        let record = match fresh_credentials(state.oauth.as_ref(), &state.store, record).await {
            Ok(record) => record,
            Err(AppError::Database(e)) => return Err(AppError::Database(e)),
            Err(e) => {
                warn!("Skipping {user_id}: {e}");
                failed += 1;
                continue;
            }
        };

        match state
            .mirror
            .connect(&record)
            .insert_timeline_item(item.clone(), None)
            .await
        {
            Ok(_) => delivered += 1,
            Err(e) => {
                warn!("Failed to insert card for {user_id}: {e}");
                failed += 1;
            }
        }
    }

    info!("Fan-out insert delivered to {delivered} users ({failed} failed)");
    Ok(FanOut::Sent { delivered, failed })
}
