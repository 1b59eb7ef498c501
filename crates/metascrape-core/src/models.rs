//! Data model shared by the queue, the worker pool and the API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// JOBS
// =============================================================================

/// Aggregate status of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, no item processed yet.
    Pending,
    /// At least one item processed, not all.
    Running,
    /// Every item processed without a storage failure.
    Complete,
    /// A storage failure aborted the batch.
    Failed,
}

impl JobStatus {
    /// `Complete` and `Failed` never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Serialization(format!("unknown job status: {other}"))),
        }
    }
}

/// A submitted batch of URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// URLs in submission order, duplicates preserved.
    pub urls: Vec<String>,
    pub status: JobStatus,
    pub total_items: i32,
    pub processed_items: i32,
    /// Items whose extraction failed (recorded as data, not a job failure).
    pub extraction_errors: i32,
    /// Why the job failed. Set iff `status == Failed`.
    pub error_message: Option<String>,
    pub submitted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a freshly submitted job. An empty batch is complete on arrival.
    pub fn new(urls: Vec<String>, submitted_by: Option<String>) -> Self {
        let now = Utc::now();
        let total_items = urls.len() as i32;
        let empty = urls.is_empty();
        Self {
            id: Uuid::now_v7(),
            urls,
            status: if empty {
                JobStatus::Complete
            } else {
                JobStatus::Pending
            },
            total_items,
            processed_items: 0,
            extraction_errors: 0,
            error_message: None,
            submitted_by,
            created_at: now,
            started_at: None,
            completed_at: if empty { Some(now) } else { None },
        }
    }

    /// Apply one worker report to the aggregate state.
    ///
    /// Returns `false` (and leaves the job untouched) when the job is already
    /// terminal.
    pub fn apply(&mut self, outcome: &ItemOutcome) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.processed_items += 1;

        match outcome {
            ItemOutcome::Extracted => {}
            ItemOutcome::ExtractionFailed(_) => self.extraction_errors += 1,
            ItemOutcome::StorageFailed(reason) => {
                return self.fail(format!("Result storage failed: {reason}"));
            }
        }

        if self.processed_items >= self.total_items {
            self.status = JobStatus::Complete;
            self.completed_at = Some(now);
        } else {
            self.status = JobStatus::Running;
        }
        true
    }

    /// Abort the job with `reason`. Returns `false` when already terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(reason.into());
        self.completed_at = Some(Utc::now());
        true
    }

    /// Client-facing projection of this job.
    pub fn view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id,
            status: self.status,
            total_items: self.total_items,
            processed_items: self.processed_items,
            extraction_errors: self.extraction_errors,
            error_message: self.error_message.clone(),
        }
    }
}

/// What a status poll returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_items: i32,
    pub processed_items: i32,
    pub extraction_errors: i32,
    pub error_message: Option<String>,
}

/// Acknowledgement of one worker report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportAck {
    /// Job state after the report.
    pub view: JobStatusView,
    /// This report retired a live claim. `false` for duplicate or stale
    /// deliveries, whose outcome was not counted.
    pub retired: bool,
    /// This report moved the job into `complete` or `failed`.
    pub finished: bool,
}

// =============================================================================
// WORK ITEMS
// =============================================================================

/// One URL of a job, claimed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Zero-based position of the URL within its job.
    pub position: i32,
    pub url: String,
    /// Number of times this item has been handed to a worker, including this one.
    pub attempts: i32,
    /// Identifies the current claim. Reports and result writes carrying a
    /// superseded token are ignored. Nil while the item is queued.
    pub claim_token: Uuid,
}

/// Per-item outcome reported to the status tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Metadata extracted and stored.
    Extracted,
    /// Fetch failed; an error record was stored.
    ExtractionFailed(String),
    /// The result could not be stored; aborts the job.
    StorageFailed(String),
}

impl ItemOutcome {
    /// Outcome for a stored extraction result.
    pub fn from_result(result: &ExtractionResult) -> Self {
        match &result.error {
            Some(err) => ItemOutcome::ExtractionFailed(err.clone()),
            None => ItemOutcome::Extracted,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ItemOutcome::Extracted => "extracted",
            ItemOutcome::ExtractionFailed(_) => "extraction_failed",
            ItemOutcome::StorageFailed(_) => "storage_failed",
        }
    }
}

/// Result of sweeping expired claims back into the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequeueReport {
    /// Items returned to the queue for another delivery.
    pub requeued: Vec<WorkItem>,
    /// Items that exhausted their deliveries and must be reported as failed.
    pub abandoned: Vec<WorkItem>,
}

impl RequeueReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.abandoned.is_empty()
    }
}

// =============================================================================
// EXTRACTION RESULTS
// =============================================================================

/// Metadata extracted from one URL.
///
/// Exactly one of "content fields meaningful" and "`error` set" holds; on
/// failure the content fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn success(
        url: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        keywords: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            description: description.into(),
            keywords: keywords.into(),
            error: None,
        }
    }

    pub fn failure(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A persisted extraction result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResult {
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub error: Option<String>,
    /// Job whose write produced the current record.
    pub job_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// USERS
// =============================================================================

/// A registered API user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Argon2id PHC string. Never serialized to clients.
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub created_at: DateTime<Utc>,
}
