use async_trait::async_trait;
use rand::Rng;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::types::{
    Attachment, Contact, Downloaded, ItemList, ListTimeline, Location, MediaUpload, Subscription,
    TimelineItem,
};
use crate::store::CredentialRecord;

/// Failure talking to the Mirror API.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("access token rejected by the Mirror API")]
    Unauthorized,

    #[error("Mirror API returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl MirrorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MirrorError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

/// Operations the app performs against the Mirror API on behalf of one user.
#[async_trait]
pub trait MirrorApi: Send + Sync {
    async fn list_timeline(&self, query: ListTimeline) -> Result<Vec<TimelineItem>, MirrorError>;

    /// Insert an item; with `media` the item and bytes go up as one multipart upload.
    async fn insert_timeline_item(
        &self,
        item: TimelineItem,
        media: Option<MediaUpload>,
    ) -> Result<TimelineItem, MirrorError>;

    async fn get_timeline_item(&self, id: &str) -> Result<TimelineItem, MirrorError>;

    async fn patch_timeline_item(
        &self,
        id: &str,
        patch: TimelineItem,
    ) -> Result<TimelineItem, MirrorError>;

    async fn delete_timeline_item(&self, id: &str) -> Result<(), MirrorError>;

    async fn list_attachments(&self, item_id: &str) -> Result<Vec<Attachment>, MirrorError>;

    async fn get_attachment(
        &self,
        item_id: &str,
        attachment_id: &str,
    ) -> Result<Attachment, MirrorError>;

    async fn get_contact(&self, id: &str) -> Result<Contact, MirrorError>;

    async fn insert_contact(&self, contact: Contact) -> Result<Contact, MirrorError>;

    async fn delete_contact(&self, id: &str) -> Result<(), MirrorError>;

    async fn get_location(&self, id: &str) -> Result<Location, MirrorError>;

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, MirrorError>;

    async fn insert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, MirrorError>;

    async fn delete_subscription(&self, id: &str) -> Result<(), MirrorError>;

    /// Fetch binary content (e.g. an attachment's content URL) with the user's token.
    async fn download(&self, url: &str) -> Result<Downloaded, MirrorError>;
}

/// Builds a facade for a user's credentials.
pub trait MirrorConnector: Send + Sync {
    fn connect(&self, credentials: &CredentialRecord) -> Box<dyn MirrorApi>;
}

/// Connector producing HTTP-backed [`MirrorClient`]s.
pub struct HttpMirrorConnector {
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
}

impl HttpMirrorConnector {
    pub fn new(http: reqwest::Client, api_base: String, upload_base: String) -> Self {
        Self {
            http,
            api_base,
            upload_base,
        }
    }
}

impl MirrorConnector for HttpMirrorConnector {
    fn connect(&self, credentials: &CredentialRecord) -> Box<dyn MirrorApi> {
        Box::new(MirrorClient {
            http: self.http.clone(),
            api_base: self.api_base.trim_end_matches('/').to_string(),
            upload_base: self.upload_base.trim_end_matches('/').to_string(),
            access_token: credentials.access_token.clone(),
        })
    }
}

/// Mirror API client bound to a single access token.
pub struct MirrorClient {
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
    access_token: String,
}

impl MirrorClient {
    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, MirrorError> {
        let url = endpoint(&self.api_base, segments)?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(&self.access_token))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, MirrorError> {
        let resp = req
            .send()
            .await
            .map_err(|e| MirrorError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(MirrorError::Unauthorized);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(MirrorError::Status { status, body })
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, MirrorError> {
        self.send(req)
            .await?
            .json()
            .await
            .map_err(|e| MirrorError::Decode(e.to_string()))
    }
}

/// Append `segments` to `base`, percent-encoding each one.
///
/// Ids come from user input; a `/` or `?` inside one must not escape the resource path.
fn endpoint(base: &str, segments: &[&str]) -> Result<url::Url, MirrorError> {
    let mut url = url::Url::parse(base)
        .map_err(|e| MirrorError::Transport(format!("invalid base URL {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| MirrorError::Transport(format!("base URL {base} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// `multipart/related` body with the JSON metadata part followed by the media part.
fn multipart_related(boundary: &str, metadata: &[u8], media: &MediaUpload) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.bytes.len() + 256);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(metadata);
    body.extend_from_slice(
        format!(
            "\r\n--{boundary}\r\nContent-Type: {}\r\nContent-Transfer-Encoding: binary\r\n\r\n",
            media.content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(&media.bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn new_boundary() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("mirror_quickstart_{suffix}")
}

#[async_trait]
impl MirrorApi for MirrorClient {
    async fn list_timeline(&self, query: ListTimeline) -> Result<Vec<TimelineItem>, MirrorError> {
        let mut req = self.request(Method::GET, &["timeline"])?;
        if let Some(max) = query.max_results {
            req = req.query(&[("maxResults", max)]);
        }
        let list: ItemList<TimelineItem> = self.send_json(req).await?;
        Ok(list.items)
    }

    async fn insert_timeline_item(
        &self,
        item: TimelineItem,
        media: Option<MediaUpload>,
    ) -> Result<TimelineItem, MirrorError> {
        let Some(media) = media else {
            return self
                .send_json(self.request(Method::POST, &["timeline"])?.json(&item))
                .await;
        };

        let metadata =
            serde_json::to_vec(&item).map_err(|e| MirrorError::Decode(e.to_string()))?;
        let boundary = new_boundary();
        let body = multipart_related(&boundary, &metadata, &media);

        let req = self
            .http
            .post(endpoint(&self.upload_base, &["timeline"])?)
            .query(&[("uploadType", "multipart")])
            .bearer_auth(&self.access_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);

        self.send_json(req).await
    }

    async fn get_timeline_item(&self, id: &str) -> Result<TimelineItem, MirrorError> {
        self.send_json(self.request(Method::GET, &["timeline", id])?)
            .await
    }

    async fn patch_timeline_item(
        &self,
        id: &str,
        patch: TimelineItem,
    ) -> Result<TimelineItem, MirrorError> {
        self.send_json(self.request(Method::PATCH, &["timeline", id])?.json(&patch))
            .await
    }

    async fn delete_timeline_item(&self, id: &str) -> Result<(), MirrorError> {
        self.send(self.request(Method::DELETE, &["timeline", id])?)
            .await?;
        Ok(())
    }

    async fn list_attachments(&self, item_id: &str) -> Result<Vec<Attachment>, MirrorError> {
        let list: ItemList<Attachment> = self
            .send_json(self.request(Method::GET, &["timeline", item_id, "attachments"])?)
            .await?;
        Ok(list.items)
    }

    async fn get_attachment(
        &self,
        item_id: &str,
        attachment_id: &str,
    ) -> Result<Attachment, MirrorError> {
        self.send_json(self.request(
            Method::GET,
            &["timeline", item_id, "attachments", attachment_id],
        )?)
        .await
    }

    async fn get_contact(&self, id: &str) -> Result<Contact, MirrorError> {
        self.send_json(self.request(Method::GET, &["contacts", id])?)
            .await
    }

    async fn insert_contact(&self, contact: Contact) -> Result<Contact, MirrorError> {
        self.send_json(self.request(Method::POST, &["contacts"])?.json(&contact))
            .await
    }

    async fn delete_contact(&self, id: &str) -> Result<(), MirrorError> {
        self.send(self.request(Method::DELETE, &["contacts", id])?)
            .await?;
        Ok(())
    }

    async fn get_location(&self, id: &str) -> Result<Location, MirrorError> {
        self.send_json(self.request(Method::GET, &["locations", id])?)
            .await
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, MirrorError> {
        let list: ItemList<Subscription> =
            self.send_json(self.request(Method::GET, &["subscriptions"])?).await?;
        Ok(list.items)
    }

    async fn insert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, MirrorError> {
        self.send_json(self.request(Method::POST, &["subscriptions"])?.json(&subscription))
            .await
    }

    async fn delete_subscription(&self, id: &str) -> Result<(), MirrorError> {
        self.send(self.request(Method::DELETE, &["subscriptions", id])?)
            .await?;
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Downloaded, MirrorError> {
        let resp = self
            .send(self.http.get(url).bearer_auth(&self.access_token))
            .await?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MirrorError::Transport(e.to_string()))?;

        Ok(Downloaded {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_related_layout() {
        let media = MediaUpload {
            content_type: "image/png".into(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        };
        let body = multipart_related("b0undary", br#"{"text":"hi"}"#, &media);
        let text = String::from_utf8_lossy(&body);

        assert!(text.starts_with(
            "--b0undary\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"text\":\"hi\"}\r\n"
        ));
        assert!(text.contains("\r\n--b0undary\r\nContent-Type: image/png\r\n"));
        assert!(text.ends_with("\r\n--b0undary--\r\n"));
    }

    #[test]
    fn test_boundaries_are_unique() {
        assert_ne!(new_boundary(), new_boundary());
    }

    #[test]
    fn test_endpoint_escapes_path_segments() {
        let url =
            endpoint("https://mirror.example.com/mirror/v1", &["contacts", "a b/c?d"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://mirror.example.com/mirror/v1/contacts/a%20b%2Fc%3Fd"
        );

        let url = endpoint(
            "https://mirror.example.com/mirror/v1/",
            &["contacts", "rust-quick-start"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://mirror.example.com/mirror/v1/contacts/rust-quick-start"
        );
    }

    #[test]
    fn test_not_found_detection() {
        let err = MirrorError::Status {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert!(err.is_not_found());
        assert!(!MirrorError::Unauthorized.is_not_found());
    }

    // ── Against a local server ──────────────────────────────────────────

    use crate::testing::serve;
    use axum::extract::Query;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn client_for(base: &str) -> Box<dyn MirrorApi> {
        let connector = HttpMirrorConnector::new(
            reqwest::Client::new(),
            format!("{base}/mirror/v1"),
            format!("{base}/upload/mirror/v1"),
        );
        connector.connect(&CredentialRecord {
            user_id: "u".into(),
            access_token: "tok".into(),
            refresh_token: None,
            expires_at: None,
            updated_at: Utc::now(),
        })
    }

    fn header(headers: &HeaderMap, name: &str) -> String {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn test_rejected_token_is_unauthorized() {
        let app = Router::new()
            .route("/mirror/v1/contacts/{id}", get(|| async { StatusCode::UNAUTHORIZED }))
            .route("/mirror/v1/subscriptions", get(|| async { StatusCode::FORBIDDEN }));
        let mirror = client_for(&serve(app).await);

        let err = mirror.get_contact("c").await.unwrap_err();
        assert!(matches!(err, MirrorError::Unauthorized));

        let err = mirror.list_subscriptions().await.unwrap_err();
        assert!(matches!(err, MirrorError::Unauthorized));
    }

    #[tokio::test]
    async fn test_other_failures_keep_status_and_body() {
        let app = Router::new().route(
            "/mirror/v1/timeline/{id}",
            get(|| async { (StatusCode::NOT_FOUND, "no such item") }),
        );
        let mirror = client_for(&serve(app).await);

        let err = mirror.get_timeline_item("missing").await.unwrap_err();
        assert!(err.is_not_found());
        match err {
            MirrorError::Status { body, .. } => assert_eq!(body, "no such item"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_requests_carry_bearer_token_and_query() {
        let app = Router::new().route(
            "/mirror/v1/timeline",
            get(
                |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    Json(json!({
                        "items": [{
                            "id": q.get("maxResults").cloned().unwrap_or_default(),
                            "text": header(&headers, "authorization"),
                        }]
                    }))
                },
            ),
        );
        let mirror = client_for(&serve(app).await);

        let items = mirror
            .list_timeline(ListTimeline {
                max_results: Some(3),
            })
            .await
            .unwrap();
        assert_eq!(items[0].id.as_deref(), Some("3"));
        assert_eq!(items[0].text.as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn test_insert_with_media_goes_to_upload_endpoint() {
        let app = Router::new().route(
            "/upload/mirror/v1/timeline",
            post(
                |headers: HeaderMap,
                 Query(q): Query<HashMap<String, String>>,
                 body: axum::body::Bytes| async move {
                    let body = String::from_utf8_lossy(&body).to_string();
                    Json(json!({
                        "id": q.get("uploadType").cloned().unwrap_or_default(),
                        "text": header(&headers, "content-type"),
                        "html": body.contains("fake-jpeg").to_string(),
                        "speakableText": header(&headers, "authorization"),
                    }))
                },
            ),
        );
        let mirror = client_for(&serve(app).await);

        let media = MediaUpload {
            content_type: "image/jpeg".into(),
            bytes: b"fake-jpeg".to_vec(),
        };
        let item = mirror
            .insert_timeline_item(TimelineItem::with_text("photo"), Some(media))
            .await
            .unwrap();

        assert_eq!(item.id.as_deref(), Some("multipart"));
        assert!(item
            .text
            .unwrap()
            .starts_with("multipart/related; boundary=mirror_quickstart_"));
        assert_eq!(item.html.as_deref(), Some("true"));
        assert_eq!(item.speakable_text.as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn test_insert_without_media_posts_json() {
        let app = Router::new().route(
            "/mirror/v1/timeline",
            post(|Json(item): Json<Value>| async move {
                Json(json!({ "id": "new", "text": item["text"] }))
            }),
        );
        let mirror = client_for(&serve(app).await);

        let item = mirror
            .insert_timeline_item(TimelineItem::with_text("hello"), None)
            .await
            .unwrap();
        assert_eq!(item.id.as_deref(), Some("new"));
        assert_eq!(item.text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let mirror = client_for("http://127.0.0.1:1");
        let err = mirror.list_subscriptions().await.unwrap_err();
        assert!(matches!(err, MirrorError::Transport(_)));
    }
}
