use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Picture Models
// ============================================================================

/// A processed shared picture: the original bytes and the rendered palette,
/// both referenced by blob key.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Picture {
    pub id: String,
    /// Ancestor key grouping all pictures of one owner.
    pub parent_key: String,
    pub owner: String,
    pub picture: String,
    pub palette: String,
    pub source_key: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Picture {
    /// Parent key under which every picture of `owner` is stored.
    pub fn picture_key(owner: &str) -> String {
        format!("Picture:{}", owner)
    }
}

#[derive(Debug, Clone)]
pub struct NewPicture<'a> {
    pub owner: &'a str,
    pub picture: &'a str,
    pub palette: &'a str,
    pub source_key: Option<&'a str>,
}
