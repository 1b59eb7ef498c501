//! Authentication: password hashing, access tokens and the request extractor.

pub mod jwt;
pub mod password;

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use tracing::{debug, Span};

use metascrape_core::logging;

pub use jwt::{generate_access_token, validate_token, Claims, JwtConfig};
pub use password::{hash_password, verify_password};

use crate::error::ApiError;
use crate::state::AppState;

/// Extractor that requires a valid bearer token for an existing user.
///
/// ```rust,ignore
/// async fn handler(auth: RequireAuth) -> Result<Json<Value>, ApiError> {
///     tracing::info!(username = %auth.username, "authenticated call");
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAuth {
    pub username: String,
    pub claims: Claims,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

        let claims = validate_token(token, &state.jwt).map_err(|e| {
            debug!(subsystem = "api", component = "auth", error = %e, "Rejected token");
            ApiError::Unauthorized("Could not validate credentials".to_string())
        })?;

        // The account must still exist.
        if state.users.find_by_username(&claims.sub).await?.is_none() {
            return Err(ApiError::Unauthorized(
                "Could not validate credentials".to_string(),
            ));
        }

        Span::current().record(logging::USERNAME, claims.sub.as_str());

        Ok(RequireAuth {
            username: claims.sub.clone(),
            claims,
        })
    }
}
