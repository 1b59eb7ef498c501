//! Structured logging conventions for metascrape.
//!
//! Events carry `subsystem` ("api", "db", "jobs", "extractor"), `component`
//! and `op` fields, plus `job_id`/`url` where an item is involved.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue (fetch failure, job failed, redelivery) |
//! | INFO  | Lifecycle events (startup, shutdown), job submission/completion |
//! | DEBUG | Decision points, claimed items, config choices |
//! | TRACE | Per-item parsing detail |

/// Username of the authenticated caller, recorded on the request span once
/// the bearer token is verified.
pub const USERNAME: &str = "username";
