//! API user accounts.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use metascrape_core::{Error, Result, User, UserRepository};

/// PostgreSQL implementation of [`UserRepository`].
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, username: &str, hashed_password: &str) -> Result<User> {
        let user = User {
            id: Uuid::now_v7(),
            username: username.to_string(),
            hashed_password: hashed_password.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO app_user (id, username, hashed_password, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.hashed_password)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::InvalidInput("Username already registered".to_string())
            }
            other => Error::Database(other),
        })?;

        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, hashed_password, created_at FROM app_user WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            username: row.get("username"),
            hashed_password: row.get("hashed_password"),
            created_at: row.get("created_at"),
        }))
    }
}
