use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unauthorized user: {0}")]
    UnauthorizedUser(String),

    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("Storage write failed: {0}")]
    StorageWrite(String),

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Transport-level failure (connect, timeout, body read) talking to the Mirror API
    /// or an attachment URL.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl AppError {
    /// Errors raised before any remote call was made, caused by the sender.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::MalformedPayload(_) | AppError::UnauthorizedUser(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::MalformedPayload(msg) => {
                (StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD", msg.clone())
            }
            AppError::UnauthorizedUser(msg) => {
                tracing::warn!("Rejected notification: {}", msg);
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED_USER", msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::UpstreamFetch(msg) => {
                tracing::error!("Upstream fetch error: {}", msg);
                (StatusCode::BAD_GATEWAY, "UPSTREAM_FETCH_ERROR", msg.clone())
            }
            AppError::Request(e) => {
                tracing::error!("HTTP request error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_FETCH_ERROR",
                    "Failed to communicate with external service".to_string(),
                )
            }
            AppError::StorageWrite(msg) => {
                tracing::error!("Storage write error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_WRITE_ERROR",
                    "Failed to persist data".to_string(),
                )
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_WRITE_ERROR",
                    "Failed to persist data".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Image(e) => {
                tracing::error!("Image error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "IMAGE_ERROR",
                    "Failed to process image".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        let resp = AppError::MalformedPayload("missing userToken".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = AppError::UnauthorizedUser("abc".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn downstream_errors_map_to_5xx() {
        let resp = AppError::UpstreamFetch("status 500".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = AppError::StorageWrite("disk full".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unauthorized_body_carries_the_rejection_reason() {
        use http_body_util::BodyExt;

        let resp = AppError::UnauthorizedUser("Verify token mismatch for user u".into())
            .into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "UNAUTHORIZED_USER");
        assert_eq!(body["error"]["message"], "Verify token mismatch for user u");
    }

    #[test]
    fn classifies_client_errors() {
        assert!(AppError::MalformedPayload("x".into()).is_client_error());
        assert!(AppError::UnauthorizedUser("x".into()).is_client_error());
        assert!(!AppError::StorageWrite("x".into()).is_client_error());
        assert!(!AppError::UpstreamFetch("x".into()).is_client_error());
    }
}
