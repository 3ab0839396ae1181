use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::{Duration, Utc};
use http::StatusCode;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{Credentials, CredentialsRepository};
use crate::error::{AppError, AppResult};

// ============================================================================
// Resource Types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<serde_json::Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<serde_json::Number>,
    /// accuracy, displayName, address, timestamp, ... echoed back untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_processing_content: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MenuAction {
    Navigate,
    Share,
    Delete,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MenuItem {
    pub action: MenuAction,
}

impl MenuItem {
    pub fn new(action: MenuAction) -> Self {
        Self { action }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationLevel {
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationConfig {
    pub level: NotificationLevel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub menu_items: Vec<MenuItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationConfig>,
}

/// Binary body uploaded alongside a timeline insert.
#[derive(Debug, Clone)]
pub struct Media {
    pub content_type: String,
    pub data: Bytes,
}

/// Raw result of fetching an attachment's content URL.
#[derive(Debug, Clone)]
pub struct ContentResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

// ============================================================================
// Client Traits
// ============================================================================

/// Mirror API operations available to a notification handler, bound to one user.
#[async_trait]
pub trait MirrorApi: Send + Sync {
    async fn get_location(&self, id: &str) -> AppResult<Location>;

    async fn get_timeline_item(&self, id: &str) -> AppResult<TimelineItem>;

    async fn get_attachment(&self, item_id: &str, attachment_id: &str) -> AppResult<Attachment>;

    async fn insert_timeline_item(
        &self,
        item: &TimelineItem,
        media: Option<Media>,
    ) -> AppResult<TimelineItem>;

    async fn delete_timeline_item(&self, id: &str) -> AppResult<()>;

    /// GET `url` through the authorised transport. Non-2xx statuses are returned, not raised.
    async fn fetch_content(&self, url: &str) -> AppResult<ContentResponse>;
}

/// Builds a request-scoped [`MirrorApi`] client from stored credentials.
#[async_trait]
pub trait MirrorClientFactory: Send + Sync + 'static {
    async fn client_for(
        &self,
        db: &SqlitePool,
        credentials: Credentials,
    ) -> AppResult<Arc<dyn MirrorApi>>;
}

// ============================================================================
// OAuth Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

// ============================================================================
// HTTP implementation
// ============================================================================

#[derive(Debug, Clone)]
pub struct MirrorService {
    client: Client,
    api_url: String,
    upload_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl MirrorService {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(config.mirror.timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            api_url: config.mirror.api_url.trim_end_matches('/').to_string(),
            upload_url: config.mirror.upload_url.trim_end_matches('/').to_string(),
            token_url: config.mirror.token_url.clone(),
            client_id: config.mirror.client_id.clone(),
            client_secret: config.mirror.client_secret.clone(),
        })
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh_token(&self, refresh_token: &str) -> AppResult<TokenResponse> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamFetch(format!(
                "Failed to refresh token ({}): {}",
                status, error_text
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AppError::UpstreamFetch(format!("Failed to parse token response: {}", e)))
    }
}

#[async_trait]
impl MirrorClientFactory for MirrorService {
    async fn client_for(
        &self,
        db: &SqlitePool,
        credentials: Credentials,
    ) -> AppResult<Arc<dyn MirrorApi>> {
        let mut access_token = credentials.access_token.clone();

        if credentials.needs_refresh(Utc::now().naive_utc()) {
            if let Some(ref refresh_token) = credentials.refresh_token {
                let token = self.refresh_token(refresh_token).await?;
                let expiry = token
                    .expires_in
                    .map(|secs| (Utc::now() + Duration::seconds(secs)).naive_utc());
                CredentialsRepository::update_access_token(
                    db,
                    &credentials.user_token,
                    &token.access_token,
                    token.refresh_token.as_deref(),
                    expiry,
                )
                .await?;
                tracing::info!(
                    "Refreshed access token for user {}",
                    credentials.user_token
                );
                access_token = token.access_token;
            }
        }

        Ok(Arc::new(MirrorClient {
            client: self.client.clone(),
            api_url: self.api_url.clone(),
            upload_url: self.upload_url.clone(),
            access_token,
        }))
    }
}

/// A Mirror API client authorised as a single user.
pub struct MirrorClient {
    client: Client,
    api_url: String,
    upload_url: String,
    access_token: String,
}

impl MirrorClient {
    async fn check(response: reqwest::Response, what: &str) -> AppResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        Err(AppError::UpstreamFetch(format!(
            "Failed to {} ({}): {}",
            what, status, error_text
        )))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String, what: &str) -> AppResult<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        Self::check(response, what)
            .await?
            .json::<T>()
            .await
            .map_err(|e| AppError::UpstreamFetch(format!("Failed to parse {} response: {}", what, e)))
    }
}

#[async_trait]
impl MirrorApi for MirrorClient {
    async fn get_location(&self, id: &str) -> AppResult<Location> {
        self.get_json(format!("{}/locations/{}", self.api_url, id), "get location")
            .await
    }

    async fn get_timeline_item(&self, id: &str) -> AppResult<TimelineItem> {
        self.get_json(format!("{}/timeline/{}", self.api_url, id), "get timeline item")
            .await
    }

    async fn get_attachment(&self, item_id: &str, attachment_id: &str) -> AppResult<Attachment> {
        self.get_json(
            format!(
                "{}/timeline/{}/attachments/{}",
                self.api_url, item_id, attachment_id
            ),
            "get attachment",
        )
        .await
    }

    async fn insert_timeline_item(
        &self,
        item: &TimelineItem,
        media: Option<Media>,
    ) -> AppResult<TimelineItem> {
        let request = match media {
            None => self
                .client
                .post(format!("{}/timeline", self.api_url))
                .json(item),
            Some(media) => {
                let metadata = serde_json::to_vec(item)
                    .map_err(|e| AppError::Internal(e.into()))?;
                let boundary = format!("mirror_notify_{}", uuid::Uuid::new_v4().simple());
                let body = multipart_related_body(&boundary, &metadata, &media);
                self.client
                    .post(format!("{}/timeline?uploadType=multipart", self.upload_url))
                    .header(
                        http::header::CONTENT_TYPE,
                        format!("multipart/related; boundary={}", boundary),
                    )
                    .body(body)
            }
        };

        let response = request.bearer_auth(&self.access_token).send().await?;

        Self::check(response, "insert timeline item")
            .await?
            .json::<TimelineItem>()
            .await
            .map_err(|e| {
                AppError::UpstreamFetch(format!("Failed to parse inserted timeline item: {}", e))
            })
    }

    async fn delete_timeline_item(&self, id: &str) -> AppResult<()> {
        let response = self
            .client
            .delete(format!("{}/timeline/{}", self.api_url, id))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        Self::check(response, "delete timeline item").await?;
        Ok(())
    }

    async fn fetch_content(&self, url: &str) -> AppResult<ContentResponse> {
        let url = url::Url::parse(url)
            .map_err(|e| AppError::UpstreamFetch(format!("Invalid content URL {}: {}", url, e)))?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        Ok(ContentResponse { status, body })
    }
}

/// Build a `multipart/related` body: JSON metadata first, then the media bytes.
fn multipart_related_body(boundary: &str, metadata: &[u8], media: &Media) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.data.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", media.content_type).as_bytes());
    body.extend_from_slice(&media.data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    use axum::extract::{Path, RawQuery, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use http::HeaderMap;
    use serde_json::{json, Value};

    use crate::test_support::test_pool;

    type RequestLog = Arc<Mutex<Vec<String>>>;

    fn header(headers: &HeaderMap, name: http::header::HeaderName) -> String {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn token(State(log): State<RequestLog>, body: String) -> Json<Value> {
        log.lock().unwrap().push(format!("token {}", body));
        Json(json!({"access_token": "fresh", "expires_in": 3600}))
    }

    async fn get_item(
        State(log): State<RequestLog>,
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> Json<Value> {
        let auth = header(&headers, http::header::AUTHORIZATION);
        log.lock().unwrap().push(format!("get {} {}", id, auth));
        Json(json!({"id": id}))
    }

    async fn delete_item(
        State(log): State<RequestLog>,
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> StatusCode {
        let auth = header(&headers, http::header::AUTHORIZATION);
        log.lock().unwrap().push(format!("delete {} {}", id, auth));
        StatusCode::NO_CONTENT
    }

    async fn insert_item(State(log): State<RequestLog>, headers: HeaderMap) -> Json<Value> {
        let content_type = header(&headers, http::header::CONTENT_TYPE);
        log.lock().unwrap().push(format!("insert {}", content_type));
        Json(json!({"id": "plain"}))
    }

    async fn upload_item(
        State(log): State<RequestLog>,
        RawQuery(query): RawQuery,
        headers: HeaderMap,
        body: Bytes,
    ) -> Json<Value> {
        let content_type = header(&headers, http::header::CONTENT_TYPE);
        let has_media = String::from_utf8_lossy(&body).contains("PALETTE");
        log.lock().unwrap().push(format!(
            "upload {} {} media={}",
            query.unwrap_or_default(),
            content_type,
            has_media
        ));
        Json(json!({"id": "with-media"}))
    }

    async fn missing_content() -> (StatusCode, &'static str) {
        (StatusCode::NOT_FOUND, "gone")
    }

    async fn spawn_mirror_server() -> (SocketAddr, RequestLog) {
        let log = RequestLog::default();
        let app = Router::new()
            .route("/token", post(token))
            .route("/mirror/timeline", post(insert_item))
            .route("/mirror/timeline/:id", get(get_item).delete(delete_item))
            .route("/upload/timeline", post(upload_item))
            .route("/content/missing", get(missing_content))
            .with_state(log.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, log)
    }

    fn config_for(addr: SocketAddr) -> Config {
        let mut config = Config::default();
        config.mirror.api_url = format!("http://{}/mirror", addr);
        config.mirror.upload_url = format!("http://{}/upload/", addr);
        config.mirror.token_url = format!("http://{}/token", addr);
        config.mirror.client_id = "client".into();
        config.mirror.client_secret = "secret".into();
        config
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_persisted() {
        let (addr, log) = spawn_mirror_server().await;
        let service = MirrorService::new(&config_for(addr)).unwrap();
        let pool = test_pool().await;
        let expired = (Utc::now() - Duration::hours(1)).naive_utc();
        let credentials =
            CredentialsRepository::upsert(&pool, "user-1", "stale", Some("r1"), Some(expired))
                .await
                .unwrap();

        let client = service.client_for(&pool, credentials).await.unwrap();
        let item = client.get_timeline_item("item-1").await.unwrap();
        assert_eq!(item.id.as_deref(), Some("item-1"));

        assert_eq!(
            log.lock().unwrap().clone(),
            vec![
                "token client_id=client&client_secret=secret&refresh_token=r1&grant_type=refresh_token"
                    .to_string(),
                "get item-1 Bearer fresh".to_string(),
            ]
        );

        let stored = CredentialsRepository::find_by_user_token(&pool, "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token, "fresh");
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
        assert!(!stored.needs_refresh(Utc::now().naive_utc()));

        // A still-valid token goes straight to the API
        log.lock().unwrap().clear();
        let client = service.client_for(&pool, stored).await.unwrap();
        client.get_timeline_item("item-2").await.unwrap();
        assert_eq!(
            log.lock().unwrap().clone(),
            vec!["get item-2 Bearer fresh".to_string()]
        );
    }

    #[tokio::test]
    async fn client_uses_mirror_endpoints() {
        let (addr, log) = spawn_mirror_server().await;
        let service = MirrorService::new(&config_for(addr)).unwrap();
        let pool = test_pool().await;
        let credentials = CredentialsRepository::upsert(&pool, "user-1", "tok", None, None)
            .await
            .unwrap();
        let client = service.client_for(&pool, credentials).await.unwrap();

        let card = TimelineItem {
            text: Some("hi".into()),
            ..Default::default()
        };
        let plain = client.insert_timeline_item(&card, None).await.unwrap();
        assert_eq!(plain.id.as_deref(), Some("plain"));

        let media = Media {
            content_type: "image/jpeg".into(),
            data: Bytes::from_static(b"PALETTE"),
        };
        let uploaded = client.insert_timeline_item(&card, Some(media)).await.unwrap();
        assert_eq!(uploaded.id.as_deref(), Some("with-media"));

        client.delete_timeline_item("item-1").await.unwrap();

        let content = client
            .fetch_content(&format!("http://{}/content/missing", addr))
            .await
            .unwrap();
        assert_eq!(content.status, StatusCode::NOT_FOUND);
        assert_eq!(content.body.as_ref(), b"gone");

        let log = log.lock().unwrap().clone();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0], "insert application/json");
        assert!(
            log[1].starts_with("upload uploadType=multipart multipart/related; boundary="),
            "unexpected upload request: {}",
            log[1]
        );
        assert!(log[1].ends_with("media=true"));
        assert_eq!(log[2], "delete item-1 Bearer tok");
    }

    #[tokio::test]
    async fn upstream_error_status_is_reported() {
        let (addr, _log) = spawn_mirror_server().await;
        let service = MirrorService::new(&config_for(addr)).unwrap();
        let pool = test_pool().await;
        let credentials = CredentialsRepository::upsert(&pool, "user-1", "tok", None, None)
            .await
            .unwrap();
        let client = service.client_for(&pool, credentials).await.unwrap();

        let err = client.get_location("latest").await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamFetch(_)));
    }

    #[test]
    fn location_card_serializes_mirror_field_names() {
        let item = TimelineItem {
            text: Some("hello".into()),
            menu_items: vec![MenuItem::new(MenuAction::Navigate)],
            notification: Some(NotificationConfig {
                level: NotificationLevel::Default,
            }),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({
                "text": "hello",
                "menuItems": [{"action": "NAVIGATE"}],
                "notification": {"level": "DEFAULT"}
            })
        );
    }

    #[test]
    fn location_keeps_unmodelled_fields() {
        let raw = json!({
            "id": "latest",
            "latitude": 37.4,
            "longitude": -122.1,
            "accuracy": 12.5,
            "displayName": "Mountain View"
        });
        let location: Location = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(location.latitude.as_ref().map(|n| n.to_string()), Some("37.4".into()));
        assert_eq!(serde_json::to_value(&location).unwrap(), raw);
    }

    #[test]
    fn timeline_item_tolerates_unknown_menu_actions() {
        let item: TimelineItem = serde_json::from_value(json!({
            "id": "item-1",
            "attachments": [{"id": "att-1", "contentUrl": "https://example.com/a", "contentType": "image/jpeg"}],
            "menuItems": [{"action": "PLAY_VIDEO"}, {"action": "SHARE"}]
        }))
        .unwrap();
        assert_eq!(item.attachments.len(), 1);
        assert_eq!(item.menu_items[0].action, MenuAction::Unknown);
        assert_eq!(item.menu_items[1].action, MenuAction::Share);
    }

    #[test]
    fn multipart_body_layout() {
        let media = Media {
            content_type: "image/jpeg".into(),
            data: Bytes::from_static(b"JPEGDATA"),
        };
        let body = multipart_related_body("b0", b"{\"a\":1}", &media);
        let expected = "--b0\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"a\":1}\r\n\
                        --b0\r\nContent-Type: image/jpeg\r\n\r\nJPEGDATA\r\n--b0--\r\n";
        assert_eq!(String::from_utf8(body).unwrap(), expected);
    }
}
