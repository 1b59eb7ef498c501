//! Core traits for metascrape abstractions.
//!
//! These traits are the seams between the pipeline and its backends: the
//! worker pool and the API only ever hold `Arc<dyn ...>` handles, so the
//! PostgreSQL and in-memory implementations are interchangeable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Durable work queue holding one item per submitted URL.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Record a job and enqueue one work item per URL, atomically.
    ///
    /// Duplicate URLs are each enqueued. An empty list yields a job that is
    /// already complete.
    async fn submit(&self, urls: Vec<String>, submitted_by: Option<&str>) -> Result<Uuid>;

    /// Claim the next queued item, or `None` when the queue is empty.
    ///
    /// Each item is handed to exactly one caller. Items belonging to a
    /// terminal job are never returned.
    async fn dequeue(&self) -> Result<Option<WorkItem>>;

    /// Return items claimed longer than `visibility_timeout` to the queue.
    ///
    /// Items already delivered `max_attempts` times are not requeued. They
    /// are claimed afresh by the caller under a new claim token and returned
    /// in [`RequeueReport::abandoned`]; the caller must report them as
    /// failed. Either way the previous holder's token is superseded.
    async fn requeue_expired(
        &self,
        visibility_timeout: Duration,
        max_attempts: i32,
    ) -> Result<RequeueReport>;

    /// Number of items waiting to be claimed.
    async fn queued_count(&self) -> Result<i64>;

    /// Handle notified whenever new items are enqueued.
    fn notifier(&self) -> Arc<Notify>;
}

// =============================================================================
// STATUS TRACKER
// =============================================================================

/// Aggregate job state derived from worker reports.
#[async_trait]
pub trait StatusTracker: Send + Sync {
    /// Record the outcome of one work item and retire it from the queue.
    ///
    /// Only the report that retires a live claim is counted; duplicate or
    /// stale reports come back with [`ReportAck::retired`] unset. Reports
    /// against a terminal job leave it unchanged.
    async fn report(&self, item: &WorkItem, outcome: &ItemOutcome) -> Result<ReportAck>;

    /// Mark a job `failed` with `reason` and drop all of its work items,
    /// claimed or not. A terminal job is left unchanged.
    async fn fail_job(&self, job_id: Uuid, reason: &str) -> Result<JobStatusView>;

    /// Current state of a job. Unknown ids yield [`crate::Error::JobNotFound`].
    async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView>;

    /// Full job record, if it exists.
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>>;
}

// =============================================================================
// RESULT STORE
// =============================================================================

/// Extraction results keyed by URL.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Insert or overwrite the record for `result.url`.
    async fn upsert(&self, job_id: Uuid, result: &ExtractionResult) -> Result<()>;

    /// Upsert on behalf of a claimed item, only while its claim is current.
    ///
    /// Returns `false`, writing nothing, once the claim was superseded by
    /// redelivery, abandonment or a failed job.
    async fn upsert_claimed(&self, item: &WorkItem, result: &ExtractionResult) -> Result<bool>;

    /// Look up the stored record for a URL.
    async fn get_by_url(&self, url: &str) -> Result<Option<StoredResult>>;
}

// =============================================================================
// USERS
// =============================================================================

/// API user accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a user. Fails with `InvalidInput` if the username is taken.
    async fn create(&self, username: &str, hashed_password: &str) -> Result<User>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;
}

// =============================================================================
// EXTRACTOR
// =============================================================================

/// Fetches a page and recovers its metadata.
///
/// Implementations never fail: every problem is captured in
/// [`ExtractionResult::error`].
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> ExtractionResult;
}
