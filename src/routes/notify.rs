use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::post,
    Router,
};

use crate::error::AppError;
use crate::services::notify::NotifyService;
use crate::AppState;

pub fn router(max_body_bytes: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/notify", post(handle_notify))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

async fn handle_notify(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), AppError> {
    let outcome = NotifyService::handle(&state, &body).await?;
    tracing::debug!("Notification handled: {:?}", outcome);
    Ok((StatusCode::OK, "OK"))
}
