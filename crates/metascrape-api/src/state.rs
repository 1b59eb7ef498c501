//! Shared handler state.

use std::sync::Arc;

use metascrape_core::{JobQueue, ResultRepository, StatusTracker, UserRepository};
use metascrape_db::Database;

use crate::auth::JwtConfig;

/// Service handles passed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub tracker: Arc<dyn StatusTracker>,
    pub results: Arc<dyn ResultRepository>,
    pub users: Arc<dyn UserRepository>,
    pub jwt: Arc<JwtConfig>,
}

impl AppState {
    /// State backed by the PostgreSQL repositories.
    pub fn from_database(db: &Database, jwt: JwtConfig) -> Self {
        Self {
            queue: Arc::new(db.jobs.clone()),
            tracker: Arc::new(db.jobs.clone()),
            results: Arc::new(db.results.clone()),
            users: Arc::new(db.users.clone()),
            jwt: Arc::new(jwt),
        }
    }

    /// State backed by a single store implementing every repository.
    pub fn from_store<S>(store: Arc<S>, jwt: JwtConfig) -> Self
    where
        S: JobQueue + StatusTracker + ResultRepository + UserRepository + 'static,
    {
        Self {
            queue: store.clone(),
            tracker: store.clone(),
            results: store.clone(),
            users: store,
            jwt: Arc::new(jwt),
        }
    }
}
