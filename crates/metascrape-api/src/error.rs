//! HTTP error responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

#[derive(Debug)]
pub enum ApiError {
    Internal(metascrape_core::Error),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
    /// Status poll of a job that a storage failure aborted.
    JobFailed { task_id: Uuid, message: String },
}

impl From<metascrape_core::Error> for ApiError {
    fn from(err: metascrape_core::Error) -> Self {
        match err {
            metascrape_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            metascrape_core::Error::JobNotFound(_) => ApiError::NotFound("Task not found".into()),
            metascrape_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            metascrape_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Internal(err) => {
                error!(subsystem = "api", error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Unauthorized(msg) => {
                let body = Json(json!({ "error": msg }));
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    body,
                )
                    .into_response();
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::JobFailed { task_id, message } => {
                let body = Json(json!({
                    "error": message,
                    "task_id": task_id,
                    "status": "failed",
                    "retry": false,
                }));
                return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
