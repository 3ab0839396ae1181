use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Picture Repository
// ============================================================================

pub struct PictureRepository;

impl PictureRepository {
    /// Persist a new picture record under the owner's parent key.
    pub async fn create(pool: &SqlitePool, new: &NewPicture<'_>) -> AppResult<Picture> {
        let id = Uuid::new_v4().to_string();
        let parent_key = Picture::picture_key(new.owner);
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Picture>(
            r#"
            INSERT INTO pictures (id, parent_key, owner, picture, palette, source_key, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, parent_key, owner, picture, palette, source_key, created_at
            "#,
        )
        .bind(&id)
        .bind(&parent_key)
        .bind(new.owner)
        .bind(new.picture)
        .bind(new.palette)
        .bind(new.source_key)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| AppError::StorageWrite(format!("Failed to save picture {}: {}", id, e)))
    }

    pub async fn find_by_source_key(
        pool: &SqlitePool,
        owner: &str,
        source_key: &str,
    ) -> AppResult<Option<Picture>> {
        sqlx::query_as::<_, Picture>(
            r#"
            SELECT id, parent_key, owner, picture, palette, source_key, created_at
            FROM pictures
            WHERE owner = ? AND source_key = ?
            LIMIT 1
            "#,
        )
        .bind(owner)
        .bind(source_key)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// All pictures grouped under the owner's parent key, newest first.
    #[cfg(test)]
    pub async fn list_by_owner(pool: &SqlitePool, owner: &str) -> AppResult<Vec<Picture>> {
        sqlx::query_as::<_, Picture>(
            r#"
            SELECT id, parent_key, owner, picture, palette, source_key, created_at
            FROM pictures
            WHERE parent_key = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(Picture::picture_key(owner))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
