use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Access tokens are refreshed when they expire within this window.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

// ============================================================================
// Credentials Models
// ============================================================================

/// OAuth credentials stored for a Mirror user, keyed by the notification `userToken`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Credentials {
    pub user_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expiry: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Credentials {
    /// True when the access token is expired (or about to be) and can be refreshed.
    pub fn needs_refresh(&self, now: NaiveDateTime) -> bool {
        match (&self.refresh_token, self.token_expiry) {
            (Some(_), Some(expiry)) => {
                expiry - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) <= now
            }
            _ => false,
        }
    }
}
