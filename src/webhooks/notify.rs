//! Mirror API notification callback.
//!
//! The Mirror API posts a JSON `Notification` here for every subscribed
//! collection change. The payload's `userToken` is the user id we registered
//! the subscription with; it selects whose credentials handle the event.
//!
//! No signature verification is performed.

use axum::{body::Bytes, extract::State, response::Json};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::mirror::{MirrorApi, MirrorError, Notification, TimelineItem};
use crate::store::fresh_credentials;
use crate::SharedState;

/// Prefixed to the text of items shared with the app.
pub const SHARE_BANNER: &str = "Rust Quick Start got your photo!";

/// Lead-in of the card inserted for location updates.
pub const LOCATION_BANNER: &str = "Rust Quick Start says you are now at";

const TIMELINE_COLLECTION: &str = "timeline";
const LOCATIONS_COLLECTION: &str = "locations";

/// What a notification resulted in.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    SharedItemPatched { item_id: String },
    LocationCardInserted,
    Ignored,
}

fn is_handled_collection(collection: &str) -> bool {
    matches!(collection, TIMELINE_COLLECTION | LOCATIONS_COLLECTION)
}

/// Act on a notification with the subscribing user's facade.
pub async fn dispatch(
    mirror: &dyn MirrorApi,
    notification: &Notification,
) -> Result<Dispatch, MirrorError> {
    match notification.collection.as_str() {
        TIMELINE_COLLECTION => handle_timeline(mirror, notification).await,
        LOCATIONS_COLLECTION => handle_location(mirror, notification).await,
        other => {
            tracing::info!("[Notify] ignoring notification for collection: {other}");
            Ok(Dispatch::Ignored)
        }
    }
}

/// Shared items get their text prefixed with [`SHARE_BANNER`].
async fn handle_timeline(
    mirror: &dyn MirrorApi,
    notification: &Notification,
) -> Result<Dispatch, MirrorError> {
    let shared = notification
        .user_actions
        .iter()
        .any(|action| action.action_type == "SHARE");

    if !shared {
        tracing::debug!("[Notify] timeline notification without SHARE action");
        return Ok(Dispatch::Ignored);
    }

    let Some(item_id) = notification.item_id.as_deref() else {
        tracing::warn!("[Notify] SHARE notification without itemId");
        return Ok(Dispatch::Ignored);
    };

    let item = mirror.get_timeline_item(item_id).await?;
    let text = format!("{SHARE_BANNER} {}", item.text.unwrap_or_default());

    mirror
        .patch_timeline_item(item_id, TimelineItem::with_text(text.trim_end()))
        .await?;

    tracing::info!("[Notify] patched shared item {item_id}");
    Ok(Dispatch::SharedItemPatched {
        item_id: item_id.to_string(),
    })
}

/// Location updates become a new card quoting the coordinates.
async fn handle_location(
    mirror: &dyn MirrorApi,
    notification: &Notification,
) -> Result<Dispatch, MirrorError> {
    let location_id = notification.item_id.as_deref().unwrap_or("latest");
    let location = mirror.get_location(location_id).await?;

    let text = format!(
        "{LOCATION_BANNER} {} by {}.",
        location.latitude, location.longitude
    );
    mirror
        .insert_timeline_item(TimelineItem::with_text(text).notify(), None)
        .await?;

    tracing::info!("[Notify] inserted location card for {location_id}");
    Ok(Dispatch::LocationCardInserted)
}

// =============================================================================
// Handler
// =============================================================================

/// POST /notify-callback
pub async fn notify_callback(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let notification: Notification = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid notification payload: {e}")))?;

    tracing::info!(
        "[Notify] collection={} operation={}",
        notification.collection,
        notification.operation.as_deref().unwrap_or("-")
    );

    if !is_handled_collection(&notification.collection) {
        tracing::info!("[Notify] unhandled collection: {}", notification.collection);
        return Ok(Json(json!({ "received": true })));
    }

    let Some(user_id) = notification.user_token.as_deref() else {
        tracing::warn!("[Notify] notification without userToken, skipping");
        return Ok(Json(json!({ "received": true })));
    };

    let Some(record) = state.store.get(user_id).await? else {
        tracing::warn!("[Notify] no stored credentials for {user_id}, skipping");
        return Ok(Json(json!({ "received": true })));
    };

    let record = fresh_credentials(state.oauth.as_ref(), &state.store, record).await?;
    let mirror = state.mirror.connect(&record);

    if let Err(e) = dispatch(mirror.as_ref(), &notification).await {
        tracing::error!("[Notify] handler error for {}: {e}", notification.collection);
        // Non-2xx makes the Mirror API redeliver.
        return Err(e.into());
    }

    Ok(Json(json!({ "received": true })))
}
