//! Batch upload and job status.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use metascrape_core::{JobStatus, JobStatusView};

use crate::auth::RequireAuth;
use crate::error::ApiError;
use crate::handlers::upload::parse_url_list;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub task_id: Uuid,
    pub message: &'static str,
}

/// `POST /upload` with a multipart `file` field holding the URL list.
pub async fn upload(
    State(state): State<AppState>,
    auth: RequireAuth,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut contents = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?;
            contents = Some(bytes);
            break;
        }
    }

    let bytes = contents.ok_or_else(|| ApiError::BadRequest("Missing file field".to_string()))?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|_| ApiError::BadRequest("Uploaded file must be UTF-8 text".to_string()))?;
    let urls = parse_url_list(text)
        .map_err(|e| ApiError::BadRequest(format!("Malformed CSV upload: {e}")))?;
    let item_count = urls.len();

    let task_id = state.queue.submit(urls, Some(&auth.username)).await?;

    info!(
        subsystem = "api",
        op = "upload",
        job_id = %task_id,
        username = %auth.username,
        item_count,
        "Scrape job accepted"
    );

    Ok(Json(UploadResponse {
        task_id,
        message: "Scraping started.",
    }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub task_id: Uuid,
    pub status: JobStatus,
    pub total_items: i32,
    pub processed_items: i32,
    pub extraction_errors: i32,
}

impl From<JobStatusView> for StatusResponse {
    fn from(view: JobStatusView) -> Self {
        Self {
            task_id: view.job_id,
            status: view.status,
            total_items: view.total_items,
            processed_items: view.processed_items,
            extraction_errors: view.extraction_errors,
        }
    }
}

/// `GET /status/:task_id`
pub async fn status(
    State(state): State<AppState>,
    _auth: RequireAuth,
    Path(task_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    // A malformed id cannot name an existing task.
    let task_id = Uuid::parse_str(&task_id)
        .map_err(|_| ApiError::NotFound("Task not found".to_string()))?;

    let view = state.tracker.get_status(task_id).await?;
    if view.status == JobStatus::Failed {
        return Err(ApiError::JobFailed {
            task_id,
            message: view
                .error_message
                .unwrap_or_else(|| "Task failed.".to_string()),
        });
    }
    Ok(Json(view.into()))
}
