//! Write-once blob storage.
//!
//! A blob is written in three steps: `create` stages an empty object for a
//! content type, `append` adds bytes to it, and `finalize` publishes it and
//! hands back a stable [`BlobKey`]. Staged objects live under `pending/` and
//! are renamed into place on finalize, so a reader never sees a partial blob.
//! A failed write is discarded with `abort`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::db::{Blob, BlobRepository};
use crate::error::{AppError, AppResult};

const PENDING_DIR: &str = "pending";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey(pub String);

impl BlobKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An object that has been created but not yet finalized.
#[derive(Debug)]
pub struct BlobHandle {
    pub name: String,
    pub content_type: String,
    pub size: u64,
}

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn create(&self, content_type: &str) -> AppResult<BlobHandle>;

    async fn append(&self, handle: &mut BlobHandle, data: &[u8]) -> AppResult<()>;

    async fn finalize(&self, handle: BlobHandle) -> AppResult<BlobKey>;

    /// Drop a staged object without publishing it.
    async fn abort(&self, handle: BlobHandle);

    async fn read(&self, key: &str) -> AppResult<Option<(Blob, Vec<u8>)>>;
}

/// Create, fill and finalize one blob.
pub async fn write_blob(
    store: &dyn BlobStore,
    content_type: &str,
    data: &[u8],
) -> AppResult<BlobKey> {
    let mut handle = store.create(content_type).await?;
    if let Err(e) = store.append(&mut handle, data).await {
        store.abort(handle).await;
        return Err(e);
    }
    store.finalize(handle).await
}

/// Filesystem-backed store; blob metadata is recorded in the `blobs` table.
pub struct FsBlobStore {
    root: PathBuf,
    db: SqlitePool,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the directory layout if needed.
    pub async fn open(root: impl Into<PathBuf>, db: SqlitePool) -> AppResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(PENDING_DIR))
            .await
            .map_err(|e| {
                AppError::StorageWrite(format!(
                    "Failed to create blob directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
        tracing::info!("Blob store ready at {}", root.display());
        Ok(Self { root, db })
    }

    fn pending_path(&self, name: &str) -> PathBuf {
        self.root.join(PENDING_DIR).join(name)
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove blob file {}: {}", path.display(), e);
        }
    }
}

fn storage_err(action: &str, name: &str, e: std::io::Error) -> AppError {
    AppError::StorageWrite(format!("Failed to {} blob {}: {}", action, name, e))
}

/// Blob keys are generated uuids; anything else never names a stored object.
fn is_valid_key(key: &str) -> bool {
    Uuid::parse_str(key).is_ok()
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn create(&self, content_type: &str) -> AppResult<BlobHandle> {
        let name = Uuid::new_v4().simple().to_string();
        tokio::fs::File::create(self.pending_path(&name))
            .await
            .map_err(|e| storage_err("create", &name, e))?;

        Ok(BlobHandle {
            name,
            content_type: content_type.to_string(),
            size: 0,
        })
    }

    async fn append(&self, handle: &mut BlobHandle, data: &[u8]) -> AppResult<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(self.pending_path(&handle.name))
            .await
            .map_err(|e| storage_err("open", &handle.name, e))?;
        file.write_all(data)
            .await
            .map_err(|e| storage_err("write", &handle.name, e))?;
        file.flush()
            .await
            .map_err(|e| storage_err("flush", &handle.name, e))?;

        handle.size += data.len() as u64;
        Ok(())
    }

    async fn finalize(&self, handle: BlobHandle) -> AppResult<BlobKey> {
        let key = Uuid::new_v4().to_string();
        let pending = self.pending_path(&handle.name);
        let path = self.blob_path(&key);

        if let Err(e) = tokio::fs::rename(&pending, &path).await {
            discard(&pending).await;
            return Err(storage_err("finalize", &handle.name, e));
        }

        if let Err(e) =
            BlobRepository::insert(&self.db, &key, &handle.content_type, handle.size as i64).await
        {
            discard(&path).await;
            return Err(e);
        }

        tracing::debug!(
            "Finalized blob {} ({} bytes, {})",
            key,
            handle.size,
            handle.content_type
        );
        Ok(BlobKey(key))
    }

    async fn abort(&self, handle: BlobHandle) {
        tracing::debug!("Discarding staged blob {}", handle.name);
        discard(&self.pending_path(&handle.name)).await;
    }

    async fn read(&self, key: &str) -> AppResult<Option<(Blob, Vec<u8>)>> {
        if !is_valid_key(key) {
            return Ok(None);
        }
        let Some(blob) = BlobRepository::find_by_key(&self.db, key).await? else {
            return Ok(None);
        };
        let data = tokio::fs::read(self.blob_path(key)).await?;
        Ok(Some((blob, data)))
    }
}
