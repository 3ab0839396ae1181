//! Shared fixtures for unit tests: in-memory database, temporary blob store
//! and a recording fake of the Mirror API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use http::StatusCode;
use image::{Rgb, RgbImage};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::config::Config;
use crate::db::{Credentials, CredentialsRepository};
use crate::error::{AppError, AppResult};
use crate::services::blobstore::FsBlobStore;
use crate::services::mirror::{
    Attachment, ContentResponse, Location, Media, MirrorApi, MirrorClientFactory, TimelineItem,
};
use crate::services::palette::encode_jpeg;
use crate::AppState;

pub const TEST_USER: &str = "user-1";

pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .expect("count rows")
}

/// A small two-colour JPEG.
pub fn sample_jpeg() -> Vec<u8> {
    let img = RgbImage::from_fn(48, 32, |x, _| {
        if x < 32 {
            Rgb([200, 40, 30])
        } else {
            Rgb([30, 60, 200])
        }
    });
    encode_jpeg(&img, 90).expect("encode sample jpeg")
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorCall {
    GetLocation(String),
    GetTimelineItem(String),
    GetAttachment(String, String),
    Insert,
    Delete(String),
    FetchContent(String),
}

/// Canned Mirror responses; every call is recorded.
#[derive(Default)]
pub struct FakeMirror {
    pub location: Option<Location>,
    pub item: Option<TimelineItem>,
    pub content_status: StatusCode,
    pub content: Vec<u8>,
    pub(crate) calls: Mutex<Vec<MirrorCall>>,
    pub(crate) inserted: Mutex<Vec<(TimelineItem, Option<Media>)>>,
}

impl FakeMirror {
    pub fn calls(&self) -> Vec<MirrorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn inserted(&self) -> Vec<(TimelineItem, Option<Media>)> {
        self.inserted.lock().unwrap().clone()
    }

    fn record(&self, call: MirrorCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MirrorApi for FakeMirror {
    async fn get_location(&self, id: &str) -> AppResult<Location> {
        self.record(MirrorCall::GetLocation(id.to_string()));
        self.location
            .clone()
            .ok_or_else(|| AppError::UpstreamFetch(format!("location {} not found", id)))
    }

    async fn get_timeline_item(&self, id: &str) -> AppResult<TimelineItem> {
        self.record(MirrorCall::GetTimelineItem(id.to_string()));
        self.item
            .clone()
            .ok_or_else(|| AppError::UpstreamFetch(format!("timeline item {} not found", id)))
    }

    async fn get_attachment(&self, item_id: &str, attachment_id: &str) -> AppResult<Attachment> {
        self.record(MirrorCall::GetAttachment(
            item_id.to_string(),
            attachment_id.to_string(),
        ));
        self.item
            .as_ref()
            .and_then(|item| item.attachments.iter().find(|a| a.id == attachment_id))
            .cloned()
            .ok_or_else(|| AppError::UpstreamFetch(format!("attachment {} not found", attachment_id)))
    }

    async fn insert_timeline_item(
        &self,
        item: &TimelineItem,
        media: Option<Media>,
    ) -> AppResult<TimelineItem> {
        self.record(MirrorCall::Insert);
        self.inserted.lock().unwrap().push((item.clone(), media));
        Ok(TimelineItem {
            id: Some("inserted-1".to_string()),
            ..item.clone()
        })
    }

    async fn delete_timeline_item(&self, id: &str) -> AppResult<()> {
        self.record(MirrorCall::Delete(id.to_string()));
        Ok(())
    }

    async fn fetch_content(&self, url: &str) -> AppResult<ContentResponse> {
        self.record(MirrorCall::FetchContent(url.to_string()));
        Ok(ContentResponse {
            status: self.content_status,
            body: Bytes::from(self.content.clone()),
        })
    }
}

pub struct FakeFactory {
    mirror: Arc<FakeMirror>,
    calls: AtomicUsize,
}

#[async_trait]
impl MirrorClientFactory for FakeFactory {
    async fn client_for(
        &self,
        _db: &SqlitePool,
        _credentials: Credentials,
    ) -> AppResult<Arc<dyn MirrorApi>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.mirror.clone())
    }
}

pub struct TestContext {
    pub state: Arc<AppState>,
    pub mirror: Arc<FakeMirror>,
    factory: Arc<FakeFactory>,
    _blob_dir: TempDir,
}

impl TestContext {
    /// Number of API clients built so far.
    pub fn factory_calls(&self) -> usize {
        self.factory.calls.load(Ordering::SeqCst)
    }
}

pub async fn test_context(mirror: FakeMirror) -> TestContext {
    test_context_with(Config::default(), mirror).await
}

/// State wired to fakes, with stored credentials for [`TEST_USER`].
pub async fn test_context_with(config: Config, mirror: FakeMirror) -> TestContext {
    let db = test_pool().await;
    CredentialsRepository::upsert(&db, TEST_USER, "access-token", None, None)
        .await
        .expect("seed credentials");

    let blob_dir = tempfile::tempdir().expect("create blob dir");
    let blobs = FsBlobStore::open(blob_dir.path(), db.clone())
        .await
        .expect("open blob store");

    let mirror = Arc::new(mirror);
    let factory = Arc::new(FakeFactory {
        mirror: mirror.clone(),
        calls: AtomicUsize::new(0),
    });

    let state = Arc::new(AppState {
        db,
        config,
        mirror: factory.clone(),
        blobs: Arc::new(blobs),
    });

    TestContext {
        state,
        mirror,
        factory,
        _blob_dir: blob_dir,
    }
}
