use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

pub struct BlobRepository;

impl BlobRepository {
    pub async fn insert(
        pool: &SqlitePool,
        blob_key: &str,
        content_type: &str,
        size: i64,
    ) -> AppResult<Blob> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Blob>(
            r#"
            INSERT INTO blobs (blob_key, content_type, size, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING blob_key, content_type, size, created_at
            "#,
        )
        .bind(blob_key)
        .bind(content_type)
        .bind(size)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| AppError::StorageWrite(format!("Failed to record blob {}: {}", blob_key, e)))
    }

    pub async fn find_by_key(pool: &SqlitePool, blob_key: &str) -> AppResult<Option<Blob>> {
        sqlx::query_as::<_, Blob>(
            r#"
            SELECT blob_key, content_type, size, created_at
            FROM blobs
            WHERE blob_key = ?
            "#,
        )
        .bind(blob_key)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }
}
