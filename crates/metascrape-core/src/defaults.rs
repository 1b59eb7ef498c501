//! Centralized default constants for metascrape.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs fall back to these when the corresponding environment
//! variable is unset or unparseable.

// =============================================================================
// EXTRACTION
// =============================================================================

/// Page fetch timeout in seconds. Bounds how long one item can block a worker.
pub const FETCH_TIMEOUT_SECS: u64 = 5;

/// User-Agent sent with every page fetch.
pub const FETCH_USER_AGENT: &str = concat!("metascrape/", env!("CARGO_PKG_VERSION"));

/// Maximum redirects followed for one fetch.
pub const FETCH_MAX_REDIRECTS: usize = 5;

// =============================================================================
// WORKER POOL
// =============================================================================

/// Default number of concurrent workers.
pub const WORKER_COUNT: usize = 4;

/// Safety-net poll interval for idle workers in milliseconds.
///
/// Workers are woken on submission; this only covers items inserted by
/// another process or the redelivery sweeper.
pub const WORKER_POLL_INTERVAL_MS: u64 = 5_000;

/// Default number of deliveries before an item is abandoned.
pub const REDELIVERY_MAX_ATTEMPTS: i32 = 3;

/// Status report attempts before the job is failed instead.
pub const REPORT_MAX_ATTEMPTS: u32 = 4;

/// First backoff delay between status report attempts.
pub const REPORT_RETRY_INITIAL_DELAY_MS: u64 = 100;

/// Backoff ceiling between status report attempts.
pub const REPORT_RETRY_MAX_DELAY_MS: u64 = 2_000;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL.
pub const DATABASE_URL: &str = "postgres://localhost/metascrape";

/// Default maximum number of connections in the pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP bind host.
pub const SERVER_HOST: &str = "0.0.0.0";

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Maximum upload body size in bytes (10 MB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

// =============================================================================
// AUTH
// =============================================================================

/// Access token lifetime in minutes.
pub const ACCESS_TOKEN_EXPIRE_MINUTES: i64 = 30;

/// Minimum accepted password length at registration.
pub const PASSWORD_MIN_LENGTH: usize = 8;
