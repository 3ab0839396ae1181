use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Credentials Repository
// ============================================================================

pub struct CredentialsRepository;

impl CredentialsRepository {
    pub async fn find_by_user_token(
        pool: &SqlitePool,
        user_token: &str,
    ) -> AppResult<Option<Credentials>> {
        sqlx::query_as::<_, Credentials>(
            r#"
            SELECT user_token, access_token, refresh_token, token_expiry, created_at, updated_at
            FROM credentials
            WHERE user_token = ?
            "#,
        )
        .bind(user_token)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Insert or replace the stored credentials for a user.
    #[cfg(test)]
    pub async fn upsert(
        pool: &SqlitePool,
        user_token: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expiry: Option<NaiveDateTime>,
    ) -> AppResult<Credentials> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Credentials>(
            r#"
            INSERT INTO credentials (
                user_token, access_token, refresh_token, token_expiry, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_token) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, credentials.refresh_token),
                token_expiry = excluded.token_expiry,
                updated_at = excluded.updated_at
            RETURNING user_token, access_token, refresh_token, token_expiry, created_at, updated_at
            "#,
        )
        .bind(user_token)
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expiry)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Store a freshly refreshed access token; the refresh token is kept unless a new one is given.
    pub async fn update_access_token(
        pool: &SqlitePool,
        user_token: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expiry: Option<NaiveDateTime>,
    ) -> AppResult<Credentials> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Credentials>(
            r#"
            UPDATE credentials
            SET access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                token_expiry = ?,
                updated_at = ?
            WHERE user_token = ?
            RETURNING user_token, access_token, refresh_token, token_expiry, created_at, updated_at
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expiry)
        .bind(now)
        .bind(user_token)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| {
            AppError::UnauthorizedUser(format!("No stored credentials for user {}", user_token))
        })
    }
}
