use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/blobs/:key", get(serve_blob))
}

/// Serve a finalized blob (stored pictures and palettes).
async fn serve_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> AppResult<impl IntoResponse> {
    let (blob, data) = state
        .blobs
        .read(&key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("blob {}", key)))?;

    Ok((
        [
            (header::CONTENT_TYPE, blob.content_type),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        data,
    ))
}
