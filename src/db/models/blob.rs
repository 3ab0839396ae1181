use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Blob {
    pub blob_key: String,
    pub content_type: String,
    pub size: i64,
    pub created_at: NaiveDateTime,
}
