//! In-process fakes for the OAuth provider and the Mirror API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;

use crate::config::{ClientSecrets, Config};
use crate::error::AppError;
use crate::mirror::{
    Attachment, Contact, Downloaded, ListTimeline, Location, MediaUpload, MirrorApi,
    MirrorConnector, MirrorError, Subscription, TimelineItem,
};
use crate::oauth::{OAuthProvider, TokenSet, UserInfo};
use crate::session::SessionSigner;
use crate::store::{CredentialRecord, CredentialStore};
use crate::{AppState, SharedState};

// ── OAuth ───────────────────────────────────────────────────────────────────

pub struct FakeProvider {
    user_id: String,
    refresh_token: Option<String>,
    reject_codes: bool,
    refresh_calls: AtomicUsize,
}

impl FakeProvider {
    /// Provider whose exchanges resolve to `user_id` and issue no refresh token.
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.into(),
            refresh_token: None,
            reject_codes: false,
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_refresh_token(mut self, token: &str) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn rejecting_codes(mut self) -> Self {
        self.reject_codes = true;
        self
    }

    pub fn access_token(&self) -> String {
        format!("access-for-{}", self.user_id)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthProvider for FakeProvider {
    fn auth_url(&self, scopes: &[&str], state: &str, login_hint: Option<&str>) -> String {
        let mut params = url::form_urlencoded::Serializer::new(String::new());
        params
            .append_pair("scope", &scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("approval_prompt", "force");
        if !state.is_empty() {
            params.append_pair("state", state);
        }
        if let Some(hint) = login_hint.filter(|h| !h.is_empty()) {
            params.append_pair("user_id", hint);
        }
        format!("https://accounts.example.com/auth?{}", params.finish())
    }

    async fn exchange_code(&self, _code: &str) -> Result<TokenSet, AppError> {
        if self.reject_codes {
            return Err(AppError::Provider("invalid_grant".into()));
        }
        Ok(TokenSet {
            access_token: self.access_token(),
            refresh_token: self.refresh_token.clone(),
            token_type: "Bearer".into(),
            expires_in: Some(3600),
            scope: None,
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenSet, AppError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenSet {
            access_token: "refreshed-access".into(),
            refresh_token: None,
            token_type: "Bearer".into(),
            expires_in: Some(3600),
            scope: None,
        })
    }

    async fn user_info(&self, _access_token: &str) -> Result<UserInfo, AppError> {
        Ok(UserInfo {
            id: (!self.user_id.is_empty()).then(|| self.user_id.clone()),
            ..Default::default()
        })
    }
}

// ── Mirror ──────────────────────────────────────────────────────────────────

/// A facade call observed by [`FakeMirror`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListTimeline,
    InsertTimelineItem {
        user: String,
        item: TimelineItem,
        media_type: Option<String>,
    },
    GetTimelineItem(String),
    PatchTimelineItem { id: String, text: Option<String> },
    DeleteTimelineItem(String),
    ListAttachments(String),
    GetAttachment(String, String),
    GetContact(String),
    InsertContact(Contact),
    DeleteContact(String),
    GetLocation(String),
    ListSubscriptions,
    InsertSubscription(Subscription),
    DeleteSubscription(String),
    Download(String),
}

#[derive(Default)]
struct FakeMirrorState {
    calls: Vec<Call>,
    timeline: HashMap<String, TimelineItem>,
    contacts: HashMap<String, Contact>,
    subscriptions: Vec<Subscription>,
    location: Location,
    fail_subscriptions: bool,
    revoked: bool,
}

/// Records every call; clones share the same log.
#[derive(Clone, Default)]
pub struct FakeMirror {
    state: Arc<Mutex<FakeMirrorState>>,
    user: String,
}

impl FakeMirror {
    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Items passed to `insert_timeline_item`, in call order.
    pub fn inserts(&self) -> Vec<TimelineItem> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::InsertTimelineItem { item, .. } => Some(item),
                _ => None,
            })
            .collect()
    }

    /// Users that received an insert, in call order.
    pub fn insert_users(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::InsertTimelineItem { user, .. } => Some(user),
                _ => None,
            })
            .collect()
    }

    pub fn put_timeline_item(&self, id: &str, text: &str) {
        let item = TimelineItem {
            id: Some(id.into()),
            ..TimelineItem::with_text(text)
        };
        self.state.lock().unwrap().timeline.insert(id.into(), item);
    }

    pub fn put_contact(&self, contact: Contact) {
        self.state
            .lock()
            .unwrap()
            .contacts
            .insert(contact.id.clone(), contact);
    }

    pub fn put_subscription(&self, collection: &str) {
        self.state.lock().unwrap().subscriptions.push(Subscription {
            id: Some(collection.into()),
            collection: collection.into(),
            callback_url: "https://example.com/notify-callback".into(),
            ..Default::default()
        });
    }

    pub fn set_location(&self, location: Location) {
        self.state.lock().unwrap().location = location;
    }

    pub fn fail_subscriptions(&self) {
        self.state.lock().unwrap().fail_subscriptions = true;
    }

    /// Reject every timeline listing as if the access token had been revoked.
    pub fn revoke_token(&self) {
        self.state.lock().unwrap().revoked = true;
    }
}

fn not_found() -> MirrorError {
    MirrorError::Status {
        status: StatusCode::NOT_FOUND,
        body: String::new(),
    }
}

#[async_trait]
impl MirrorApi for FakeMirror {
    async fn list_timeline(&self, query: ListTimeline) -> Result<Vec<TimelineItem>, MirrorError> {
        self.record(Call::ListTimeline);
        let state = self.state.lock().unwrap();
        if state.revoked {
            return Err(MirrorError::Unauthorized);
        }
        let max = query.max_results.unwrap_or(u32::MAX) as usize;
        Ok(state.timeline.values().take(max).cloned().collect())
    }

    async fn insert_timeline_item(
        &self,
        item: TimelineItem,
        media: Option<MediaUpload>,
    ) -> Result<TimelineItem, MirrorError> {
        self.record(Call::InsertTimelineItem {
            user: self.user.clone(),
            item: item.clone(),
            media_type: media.map(|m| m.content_type),
        });
        Ok(TimelineItem {
            id: Some("inserted".into()),
            ..item
        })
    }

    async fn get_timeline_item(&self, id: &str) -> Result<TimelineItem, MirrorError> {
        self.record(Call::GetTimelineItem(id.into()));
        self.state
            .lock()
            .unwrap()
            .timeline
            .get(id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn patch_timeline_item(
        &self,
        id: &str,
        patch: TimelineItem,
    ) -> Result<TimelineItem, MirrorError> {
        self.record(Call::PatchTimelineItem {
            id: id.into(),
            text: patch.text.clone(),
        });
        Ok(patch)
    }

    async fn delete_timeline_item(&self, id: &str) -> Result<(), MirrorError> {
        self.record(Call::DeleteTimelineItem(id.into()));
        Ok(())
    }

    async fn list_attachments(&self, item_id: &str) -> Result<Vec<Attachment>, MirrorError> {
        self.record(Call::ListAttachments(item_id.into()));
        Ok(Vec::new())
    }

    async fn get_attachment(
        &self,
        item_id: &str,
        attachment_id: &str,
    ) -> Result<Attachment, MirrorError> {
        self.record(Call::GetAttachment(item_id.into(), attachment_id.into()));
        Ok(Attachment {
            id: Some(attachment_id.into()),
            content_type: Some("image/png".into()),
            content_url: Some(format!("https://media.example.com/{attachment_id}")),
            is_processing_content: Some(false),
        })
    }

    async fn get_contact(&self, id: &str) -> Result<Contact, MirrorError> {
        self.record(Call::GetContact(id.into()));
        self.state
            .lock()
            .unwrap()
            .contacts
            .get(id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn insert_contact(&self, contact: Contact) -> Result<Contact, MirrorError> {
        self.record(Call::InsertContact(contact.clone()));
        Ok(contact)
    }

    async fn delete_contact(&self, id: &str) -> Result<(), MirrorError> {
        self.record(Call::DeleteContact(id.into()));
        Ok(())
    }

    async fn get_location(&self, id: &str) -> Result<Location, MirrorError> {
        self.record(Call::GetLocation(id.into()));
        Ok(self.state.lock().unwrap().location.clone())
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, MirrorError> {
        self.record(Call::ListSubscriptions);
        Ok(self.state.lock().unwrap().subscriptions.clone())
    }

    async fn insert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, MirrorError> {
        self.record(Call::InsertSubscription(subscription.clone()));
        if self.state.lock().unwrap().fail_subscriptions {
            return Err(MirrorError::Status {
                status: StatusCode::BAD_REQUEST,
                body: "callbackUrl must be HTTPS".into(),
            });
        }
        Ok(subscription)
    }

    async fn delete_subscription(&self, id: &str) -> Result<(), MirrorError> {
        self.record(Call::DeleteSubscription(id.into()));
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Downloaded, MirrorError> {
        self.record(Call::Download(url.into()));
        Ok(Downloaded {
            content_type: Some("image/png".into()),
            bytes: b"fake-png".to_vec(),
        })
    }
}

/// Hands out [`FakeMirror`] views tagged with the connecting user.
pub struct FakeConnector(pub FakeMirror);

impl MirrorConnector for FakeConnector {
    fn connect(&self, credentials: &CredentialRecord) -> Box<dyn MirrorApi> {
        Box::new(FakeMirror {
            state: self.0.state.clone(),
            user: credentials.user_id.clone(),
        })
    }
}

// ── Local HTTP server ───────────────────────────────────────────────────────

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ── App state ───────────────────────────────────────────────────────────────

pub fn test_config(base_url: &str) -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        base_url: base_url.into(),
        database_url: "sqlite::memory:".into(),
        session_secret: test_session_secret(),
        client: ClientSecrets {
            client_id: "client.apps.googleusercontent.com".into(),
            client_secret: "secret".into(),
            redirect_uri: format!("{base_url}/oauth2callback"),
            auth_uri: "https://accounts.example.com/auth".into(),
            token_uri: "https://accounts.example.com/token".into(),
        },
        userinfo_url: "https://accounts.example.com/userinfo".into(),
        mirror_api_base: "https://mirror.example.com/v1".into(),
        mirror_upload_base: "https://mirror.example.com/upload/v1".into(),
    }
}

pub fn test_session_secret() -> String {
    base64::engine::general_purpose::STANDARD.encode([0x43u8; 32])
}

/// App state over an in-memory store with fake provider and facade.
pub async fn test_state(
    base_url: &str,
    provider: FakeProvider,
    mirror: FakeMirror,
) -> SharedState {
    let config = test_config(base_url);
    let store = CredentialStore::init(&config.database_url).await.unwrap();
    let sessions = SessionSigner::new(&config.session_secret).unwrap();

    Arc::new(AppState {
        config,
        store,
        oauth: Box::new(provider),
        mirror: Box::new(FakeConnector(mirror)),
        sessions,
        http: reqwest::Client::new(),
    })
}
