//! HS256 access tokens.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use metascrape_core::{defaults, Error, Result};

/// Claims embedded in every access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Username of the token holder.
    pub sub: String,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier.
    pub jti: String,
}

/// Signing configuration for access tokens.
#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expire_minutes: i64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field(
                "access_token_expire_minutes",
                &self.access_token_expire_minutes,
            )
            .finish()
    }
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_token_expire_minutes: defaults::ACCESS_TOKEN_EXPIRE_MINUTES,
        }
    }

    /// Load from the environment.
    ///
    /// | Variable | Required | Default |
    /// |----------|----------|---------|
    /// | `JWT_SECRET` | yes | -- |
    /// | `ACCESS_TOKEN_EXPIRE_MINUTES` | no | `30` |
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("JWT_SECRET must be set".to_string()))?;

        let access_token_expire_minutes = match std::env::var("ACCESS_TOKEN_EXPIRE_MINUTES") {
            Ok(v) => v.parse::<i64>().ok().filter(|m| *m > 0).ok_or_else(|| {
                Error::Config(format!(
                    "ACCESS_TOKEN_EXPIRE_MINUTES must be a positive integer, got {v:?}"
                ))
            })?,
            Err(_) => defaults::ACCESS_TOKEN_EXPIRE_MINUTES,
        };

        Ok(Self {
            secret,
            access_token_expire_minutes,
        })
    }

    pub fn with_expiry_minutes(mut self, minutes: i64) -> Self {
        self.access_token_expire_minutes = minutes;
        self
    }
}

/// Issue an access token for `username`.
pub fn generate_access_token(
    username: &str,
    config: &JwtConfig,
) -> std::result::Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: username.to_string(),
        exp: now + config.access_token_expire_minutes * 60,
        iat: now,
        jti: Uuid::new_v4().to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Check signature and expiry, returning the claims.
pub fn validate_token(
    token: &str,
    config: &JwtConfig,
) -> std::result::Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}
