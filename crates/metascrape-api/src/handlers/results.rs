//! Stored extraction results.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use metascrape_core::StoredResult;

use crate::auth::RequireAuth;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub error: Option<String>,
}

impl From<StoredResult> for ResultResponse {
    fn from(r: StoredResult) -> Self {
        Self {
            url: r.url,
            title: r.title,
            description: r.description,
            keywords: r.keywords,
            error: r.error,
        }
    }
}

/// `GET /results?url=...`
pub async fn get_result(
    State(state): State<AppState>,
    _auth: RequireAuth,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<ResultResponse>, ApiError> {
    state
        .results
        .get_by_url(&query.url)
        .await?
        .map(|r| Json(r.into()))
        .ok_or_else(|| ApiError::NotFound("No results for this URL".to_string()))
}
