pub mod auth;
pub mod jobs;
pub mod results;
pub mod upload;

use axum::Json;
use serde_json::{json, Value};

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
