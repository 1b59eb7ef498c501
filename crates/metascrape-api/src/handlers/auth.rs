//! Account registration and token issuance.

use axum::extract::State;
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use metascrape_core::{defaults, Error};

use crate::auth::{generate_access_token, hash_password, verify_password};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
    pub username: String,
}

/// `POST /register`
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }
    if req.password.chars().count() < defaults::PASSWORD_MIN_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            defaults::PASSWORD_MIN_LENGTH
        )));
    }

    let password = req.password.clone();
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| Error::Internal(format!("Password hashing task failed: {e}")))?
        .map_err(|e| Error::Internal(format!("Password hashing failed: {e}")))?;
    let user = state.users.create(username, &hashed).await?;

    info!(
        subsystem = "api",
        component = "auth",
        op = "register",
        username = %user.username,
        "User registered"
    );

    Ok(Json(RegisterResponse {
        id: user.id,
        username: user.username,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

/// `POST /token` (form-encoded credentials)
pub async fn token(
    State(state): State<AppState>,
    Form(form): Form<TokenForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let bad_credentials = || ApiError::BadRequest("Incorrect username or password".to_string());

    let user = state
        .users
        .find_by_username(form.username.trim())
        .await?
        .ok_or_else(bad_credentials)?;

    let password = form.password;
    let stored_hash = user.hashed_password.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| Error::Internal(format!("Password check task failed: {e}")))?
        .map_err(|e| Error::Internal(format!("Stored password hash unreadable: {e}")))?;
    if !valid {
        return Err(bad_credentials());
    }

    let access_token = generate_access_token(&user.username, &state.jwt)
        .map_err(|e| Error::Internal(format!("Token signing failed: {e}")))?;

    info!(
        subsystem = "api",
        component = "auth",
        op = "token",
        username = %user.username,
        "Access token issued"
    );

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}
