//! Test fixtures for database integration tests.
//!
//! PostgreSQL tests run only when `DATABASE_URL` is set; otherwise
//! [`test_database`] returns `None` and the test returns early.

use crate::Database;

/// Connect to the test database and apply migrations.
///
/// Returns `None` when `DATABASE_URL` is unset. Panics if it is set but the
/// database is unreachable, so misconfiguration fails loudly.
pub async fn test_database() -> Option<Database> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let db = Database::connect(&url)
        .await
        .unwrap_or_else(|e| panic!("DATABASE_URL set but unreachable: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db.pool)
        .await
        .unwrap_or_else(|e| panic!("migrations failed: {e}"));
    Some(db)
}

/// URL that no other test uses, so parallel tests do not collide on
/// `scraped_data.url`.
pub fn unique_url(label: &str) -> String {
    format!("http://{label}-{}.test/", uuid::Uuid::now_v7().simple())
}
