//! Route handlers.
//!
//! Every handler except the OAuth callback, the notification webhook and the
//! health check starts with [`require_session`], which either yields a facade
//! for the signed-in user or redirects the browser to sign in. Form posts set a
//! flash message in the session cookie and redirect back to the dashboard.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::cards::{self, DEMO_CONTACT_ID};
use super::fanout;
use crate::error::{AppError, GetCredentialsError};
use crate::mirror::{
    ListTimeline, MediaUpload, MirrorApi, MirrorError, Subscription, TimelineItem,
};
use crate::oauth::CredentialFlow;
use crate::session::Session;
use crate::store::fresh_credentials;
use crate::webhooks::notify;
use crate::{AppState, SharedState};

const TIMELINE_COLLECTION: &str = "timeline";
const LOCATIONS_COLLECTION: &str = "locations";

const HTTPS_REQUIRED_MESSAGE: &str =
    "Could not subscribe because the application is not running as HTTPS.";

// =============================================================================
// Router
// =============================================================================

pub fn app_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── Dashboard ────────────────────────────────────────────────────
        .route("/", get(dashboard))
        // ── Timeline ─────────────────────────────────────────────────────
        .route("/insert-item", post(insert_item))
        .route("/insert-item-with-action", post(insert_item_with_action))
        .route("/insert-pretty-item", post(insert_pretty_item))
        .route("/insert-all-users", post(insert_all_users))
        .route("/delete-item", post(delete_item))
        .route("/attachment-proxy", get(attachment_proxy))
        // ── Contacts ─────────────────────────────────────────────────────
        .route("/insert-contact", post(insert_contact))
        .route("/delete-contact", post(delete_contact))
        // ── Subscriptions ────────────────────────────────────────────────
        .route("/insert-subscription", post(insert_subscription))
        .route("/delete-subscription", post(delete_subscription))
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/oauth2callback", get(oauth2_callback))
        .route("/signout", post(signout))
        // ── Webhooks ─────────────────────────────────────────────────────
        .route("/notify-callback", post(notify::notify_callback))
        .with_state(state)
}

// =============================================================================
// Session gate
// =============================================================================

/// A signed-in request: the session plus a facade bound to the user's credentials.
pub(crate) struct Authorized {
    pub session: Session,
    pub user_id: String,
    pub mirror: Box<dyn MirrorApi>,
}

/// Resolve the session's user to live credentials, or ask the browser to sign in.
pub(crate) async fn require_session(
    state: &AppState,
    session: Session,
) -> Result<Authorized, AppError> {
    let user_id = session.user_id.clone().ok_or(AppError::SignInRequired)?;

    let record = state
        .store
        .get(&user_id)
        .await?
        .ok_or(AppError::SignInRequired)?;

    let record = match fresh_credentials(state.oauth.as_ref(), &state.store, record).await {
        Ok(record) => record,
        Err(AppError::RefreshFailed(e)) => {
            warn!("Refresh failed for {user_id}, sending back to consent: {e}");
            return Err(AppError::SignInRequired);
        }
        Err(e) => return Err(e),
    };

    Ok(Authorized {
        mirror: state.mirror.connect(&record),
        session,
        user_id,
    })
}

/// A token the Mirror API rejects was revoked out from under us; consent again.
fn reauthorize(e: MirrorError) -> AppError {
    match e {
        MirrorError::Unauthorized => {
            warn!("Stored access token rejected, sending back to consent");
            AppError::SignInRequired
        }
        other => AppError::Mirror(other),
    }
}

/// Store `message` in the session and go back to the dashboard.
fn flash_redirect(
    state: &AppState,
    session: Session,
    message: impl Into<String>,
) -> Result<Response, AppError> {
    let cookie = state.sessions.cookie(&session.flash(message))?;
    Ok((cookie, Redirect::to("/")).into_response())
}

// =============================================================================
// Health
// =============================================================================

async fn status(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, AppError> {
    let users = state.store.count_users().await?;
    Ok(Json(json!({
        "status": "ok",
        "service": "mirror-quickstart",
        "version": env!("CARGO_PKG_VERSION"),
        "users": users,
    })))
}

// =============================================================================
// Dashboard
// =============================================================================

/// GET / — Recent items, demo contact presence and subscription flags.
async fn dashboard(
    State(state): State<SharedState>,
    session: Session,
) -> Result<Response, AppError> {
    let mut auth = require_session(&state, session).await?;
    let message = auth.session.take_message();

    let items = auth
        .mirror
        .list_timeline(ListTimeline {
            max_results: Some(3),
        })
        .await
        .map_err(reauthorize)?;

    // A missing contact is the normal "not inserted yet" state.
    let contact = match auth.mirror.get_contact(DEMO_CONTACT_ID).await {
        Ok(contact) => Some(contact),
        Err(e) => {
            tracing::debug!("Demo contact lookup failed: {e}");
            None
        }
    };

    let subscriptions = auth
        .mirror
        .list_subscriptions()
        .await
        .map_err(reauthorize)?;
    let subscribed =
        |collection: &str| subscriptions.iter().any(|s| s.collection == collection);

    let body = json!({
        "data": {
            "user_id": auth.user_id,
            "message": message,
            "timeline_items": items,
            "contact": contact,
            "timeline_subscription_exists": subscribed(TIMELINE_COLLECTION),
            "location_subscription_exists": subscribed(LOCATIONS_COLLECTION),
        }
    });

    let cookie = state.sessions.cookie(&auth.session)?;
    Ok((cookie, Json(body)).into_response())
}

// =============================================================================
// Timeline
// =============================================================================

#[derive(Deserialize)]
struct InsertItemForm {
    #[serde(default)]
    message: String,
    #[serde(rename = "imageUrl", default)]
    image_url: String,
    #[serde(rename = "contentType", default)]
    content_type: String,
}

/// Download the media a user pointed the new card at.
async fn fetch_media(
    http: &reqwest::Client,
    url: &str,
    content_type: &str,
) -> Result<MediaUpload, AppError> {
    let resp = http
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AppError::BadRequest(format!("could not fetch {url}: {e}")))?;

    let content_type = if content_type.is_empty() {
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string()
    } else {
        content_type.to_string()
    };

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| AppError::BadRequest(format!("could not read {url}: {e}")))?;

    Ok(MediaUpload {
        content_type,
        bytes: bytes.to_vec(),
    })
}

/// POST /insert-item — Text card, optionally with an image fetched from `imageUrl`.
async fn insert_item(
    State(state): State<SharedState>,
    session: Session,
    Form(form): Form<InsertItemForm>,
) -> Result<Response, AppError> {
    let auth = require_session(&state, session).await?;

    let media = if form.image_url.is_empty() {
        None
    } else {
        Some(fetch_media(&state.http, &form.image_url, &form.content_type).await?)
    };

    let item = TimelineItem::with_text(form.message).notify();
    auth.mirror.insert_timeline_item(item, media).await?;

    flash_redirect(&state, auth.session, "A timeline item has been inserted.")
}

/// POST /insert-item-with-action
async fn insert_item_with_action(
    State(state): State<SharedState>,
    session: Session,
) -> Result<Response, AppError> {
    let auth = require_session(&state, session).await?;

    auth.mirror
        .insert_timeline_item(cards::item_with_actions(&state.config), None)
        .await?;

    flash_redirect(
        &state,
        auth.session,
        "A timeline item with actions has been inserted.",
    )
}

/// POST /insert-pretty-item
async fn insert_pretty_item(
    State(state): State<SharedState>,
    session: Session,
) -> Result<Response, AppError> {
    let auth = require_session(&state, session).await?;

    auth.mirror
        .insert_timeline_item(cards::pretty_item(&state.config), None)
        .await?;

    flash_redirect(
        &state,
        auth.session,
        "A timeline item with HTML has been inserted.",
    )
}

/// POST /insert-all-users — Broadcast a card to every stored user.
async fn insert_all_users(
    State(state): State<SharedState>,
    session: Session,
) -> Result<Response, AppError> {
    let auth = require_session(&state, session).await?;

    let outcome = fanout::insert_for_all_users(&state, &cards::broadcast_item()).await?;

    flash_redirect(&state, auth.session, outcome.message())
}

#[derive(Deserialize)]
struct DeleteItemForm {
    #[serde(rename = "itemId")]
    item_id: String,
}

/// POST /delete-item
async fn delete_item(
    State(state): State<SharedState>,
    session: Session,
    Form(form): Form<DeleteItemForm>,
) -> Result<Response, AppError> {
    let auth = require_session(&state, session).await?;

    auth.mirror.delete_timeline_item(&form.item_id).await?;

    flash_redirect(&state, auth.session, "A timeline item has been deleted.")
}

#[derive(Deserialize)]
struct AttachmentQuery {
    #[serde(rename = "timelineItem")]
    timeline_item: String,
    attachment: String,
}

/// GET /attachment-proxy — Stream an attachment's bytes using the user's token.
async fn attachment_proxy(
    State(state): State<SharedState>,
    session: Session,
    Query(q): Query<AttachmentQuery>,
) -> Result<Response, AppError> {
    let auth = require_session(&state, session).await?;

    let attachment = auth
        .mirror
        .get_attachment(&q.timeline_item, &q.attachment)
        .await?;

    let content_url = attachment
        .content_url
        .ok_or_else(|| AppError::NotFound("attachment content".into()))?;

    let downloaded = auth.mirror.download(&content_url).await?;
    let content_type = downloaded
        .content_type
        .or(attachment.content_type)
        .unwrap_or_else(|| "application/octet-stream".into());

    Ok(([(header::CONTENT_TYPE, content_type)], downloaded.bytes).into_response())
}

// =============================================================================
// Contacts
// =============================================================================

/// POST /insert-contact
async fn insert_contact(
    State(state): State<SharedState>,
    session: Session,
) -> Result<Response, AppError> {
    let auth = require_session(&state, session).await?;

    let contact = auth
        .mirror
        .insert_contact(cards::demo_contact(&state.config))
        .await?;

    flash_redirect(
        &state,
        auth.session,
        format!("Inserted contact: {}", contact.display_name),
    )
}

/// POST /delete-contact
async fn delete_contact(
    State(state): State<SharedState>,
    session: Session,
) -> Result<Response, AppError> {
    let auth = require_session(&state, session).await?;

    auth.mirror.delete_contact(DEMO_CONTACT_ID).await?;

    flash_redirect(&state, auth.session, "Contact has been deleted.")
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Deserialize)]
struct SubscriptionForm {
    #[serde(rename = "subscriptionId")]
    subscription_id: String,
}

fn validate_collection(collection: &str) -> Result<(), AppError> {
    match collection {
        TIMELINE_COLLECTION | LOCATIONS_COLLECTION => Ok(()),
        other => Err(AppError::BadRequest(format!(
            "unknown subscription collection: {other}"
        ))),
    }
}

/// Subscribe `user_id` to `collection` notifications at our callback URL.
///
/// The Mirror API only delivers to HTTPS endpoints, so plain HTTP deployments
/// are refused up front.
async fn subscribe(
    state: &AppState,
    mirror: &dyn MirrorApi,
    user_id: &str,
    collection: &str,
) -> Result<(), String> {
    let callback_url = state.config.notify_callback_url();
    let is_https = url::Url::parse(&callback_url)
        .map(|u| u.scheme() == "https")
        .unwrap_or(false);
    if !is_https {
        return Err(HTTPS_REQUIRED_MESSAGE.to_string());
    }

    let subscription = Subscription {
        collection: collection.into(),
        callback_url,
        user_token: Some(user_id.into()),
        ..Default::default()
    };

    mirror
        .insert_subscription(subscription)
        .await
        .map(|_| ())
        .map_err(|e| format!("Could not subscribe: {e}"))
}

/// POST /insert-subscription — Failures become a flash message, not an error page.
async fn insert_subscription(
    State(state): State<SharedState>,
    session: Session,
    Form(form): Form<SubscriptionForm>,
) -> Result<Response, AppError> {
    let auth = require_session(&state, session).await?;
    validate_collection(&form.subscription_id)?;

    let message = match subscribe(
        &state,
        auth.mirror.as_ref(),
        &auth.user_id,
        &form.subscription_id,
    )
    .await
    {
        Ok(()) => "Application is now subscribed to updates.".to_string(),
        Err(message) => {
            warn!("Subscription to {} failed: {message}", form.subscription_id);
            message
        }
    };

    flash_redirect(&state, auth.session, message)
}

/// POST /delete-subscription
async fn delete_subscription(
    State(state): State<SharedState>,
    session: Session,
    Form(form): Form<SubscriptionForm>,
) -> Result<Response, AppError> {
    let auth = require_session(&state, session).await?;
    validate_collection(&form.subscription_id)?;

    auth.mirror.delete_subscription(&form.subscription_id).await?;

    flash_redirect(&state, auth.session, "Application has been unsubscribed.")
}

// =============================================================================
// OAuth
// =============================================================================

#[derive(Deserialize)]
struct OAuthCallbackQuery {
    code: Option<String>,
    error: Option<String>,
    #[serde(default)]
    state: String,
}

/// Best-effort setup for a freshly authorized user.
async fn bootstrap_user(state: &AppState, mirror: &dyn MirrorApi, user_id: &str) {
    if let Err(message) = subscribe(state, mirror, user_id, TIMELINE_COLLECTION).await {
        warn!("Bootstrap subscription skipped for {user_id}: {message}");
    }

    if let Err(e) = mirror.insert_contact(cards::demo_contact(&state.config)).await {
        warn!("Bootstrap contact insert failed for {user_id}: {e}");
    }

    if let Err(e) = mirror.insert_timeline_item(cards::welcome_item(), None).await {
        warn!("Bootstrap welcome card failed for {user_id}: {e}");
    }
}

/// GET /oauth2callback — Start consent, or finish it when the provider sends a code.
async fn oauth2_callback(
    State(state): State<SharedState>,
    Query(q): Query<OAuthCallbackQuery>,
) -> Result<Response, AppError> {
    if let Some(error) = q.error {
        warn!("Authorization denied: {error}");
        return Err(AppError::BadRequest(format!("authorization denied: {error}")));
    }

    let flow = CredentialFlow::new(state.oauth.as_ref(), &state.store);

    let Some(code) = q.code else {
        let url = flow.build_authorization_url("", &q.state);
        return Ok(Redirect::to(&url).into_response());
    };

    let credentials = match flow.get_credentials(&code, &q.state).await {
        Ok(credentials) => credentials,
        Err(GetCredentialsError::Storage(e)) => return Err(e),
        Err(e) => match e.redirect_url() {
            Some(url) => {
                info!("Redirecting to consent: {e}");
                return Ok(Redirect::to(url).into_response());
            }
            None => return Err(AppError::Provider(e.to_string())),
        },
    };

    let mirror = state.mirror.connect(&credentials);
    bootstrap_user(&state, mirror.as_ref(), &credentials.user_id).await;

    info!("User {} signed in", credentials.user_id);
    let cookie = state.sessions.cookie(&Session::for_user(credentials.user_id))?;
    Ok((cookie, Redirect::to("/")).into_response())
}

/// POST /signout — Drop the session cookie.
async fn signout(State(state): State<SharedState>) -> Response {
    (state.sessions.clear_cookie(), Redirect::to("/")).into_response()
}
