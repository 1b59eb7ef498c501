//! # metascrape-db
//!
//! Storage layer for metascrape.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL job queue and status tracker (`FOR UPDATE SKIP LOCKED` claiming)
//! - Result and user repositories
//! - An in-memory backend with the same semantics, for tests and local runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use metascrape_db::{Database, JobQueue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/metascrape").await?;
//!     let job_id = db.jobs.submit(vec!["https://example.com".into()], None).await?;
//!     println!("Submitted job: {}", job_id);
//!     Ok(())
//! }
//! ```

pub mod jobs;
pub mod memory;
pub mod pool;
pub mod results;
pub mod users;

// Always compiled so integration tests (in tests/) can use the helpers.
pub mod test_fixtures;

// Re-export core types
pub use metascrape_core::*;

pub use jobs::PgJobRepository;
pub use memory::InMemoryStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use results::PgResultRepository;
pub use users::PgUserRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job queue and status tracker.
    pub jobs: PgJobRepository,
    /// Extraction results keyed by URL.
    pub results: PgResultRepository,
    /// API users.
    pub users: PgUserRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobRepository::new(pool.clone()),
            results: PgResultRepository::new(pool.clone()),
            users: PgUserRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            jobs: self.jobs.clone(),
            results: self.results.clone(),
            users: self.users.clone(),
        }
    }
}
