//! In-process backend implementing every repository trait.
//!
//! Used by the test suites. Semantics match the PostgreSQL repositories:
//! FIFO claiming, no items handed out for terminal jobs, duplicate reports
//! ignored.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use metascrape_core::{
    Error, ExtractionResult, ItemOutcome, Job, JobQueue, JobStatus, JobStatusView, ReportAck,
    RequeueReport, Result, ResultRepository, StatusTracker, StoredResult, User, UserRepository,
    WorkItem,
};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    queued: VecDeque<WorkItem>,
    claimed: HashMap<Uuid, (WorkItem, Instant)>,
    results: HashMap<String, StoredResult>,
    users: HashMap<String, User>,
}

/// Memory-resident queue, status tracker, result store and user store.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    notify: Arc<Notify>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of claimed items not yet reported.
    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.claimed.len()
    }
}

/// Whether `item` presents the token of its current claim.
fn holds_claim(claimed: &HashMap<Uuid, (WorkItem, Instant)>, item: &WorkItem) -> bool {
    claimed
        .get(&item.id)
        .is_some_and(|(current, _)| current.claim_token == item.claim_token)
}

fn stored(job_id: Uuid, result: &ExtractionResult) -> StoredResult {
    StoredResult {
        url: result.url.clone(),
        title: result.title.clone(),
        description: result.description.clone(),
        keywords: result.keywords.clone(),
        error: result.error.clone(),
        job_id: Some(job_id),
        updated_at: Utc::now(),
    }
}

#[async_trait]
impl JobQueue for InMemoryStore {
    async fn submit(&self, urls: Vec<String>, submitted_by: Option<&str>) -> Result<Uuid> {
        let job = Job::new(urls, submitted_by.map(str::to_string));
        let job_id = job.id;
        let total = job.total_items;

        {
            let mut state = self.state.lock().await;
            state
                .queued
                .extend(job.urls.iter().enumerate().map(|(position, url)| WorkItem {
                    id: Uuid::now_v7(),
                    job_id,
                    position: position as i32,
                    url: url.clone(),
                    attempts: 0,
                    claim_token: Uuid::nil(),
                }));
            state.jobs.insert(job_id, job);
        }

        info!(
            subsystem = "db",
            component = "queue",
            op = "submit",
            job_id = %job_id,
            item_count = total,
            "Job submitted"
        );

        if total > 0 {
            self.notify.notify_waiters();
        }
        Ok(job_id)
    }

    async fn dequeue(&self) -> Result<Option<WorkItem>> {
        let mut state = self.state.lock().await;
        while let Some(mut item) = state.queued.pop_front() {
            let live = state
                .jobs
                .get(&item.job_id)
                .is_some_and(|job| !job.status.is_terminal());
            if !live {
                continue;
            }
            item.attempts += 1;
            item.claim_token = Uuid::now_v7();
            state.claimed.insert(item.id, (item.clone(), Instant::now()));
            debug!(
                subsystem = "db",
                component = "queue",
                op = "dequeue",
                job_id = %item.job_id,
                url = %item.url,
                attempt = item.attempts,
                "Claimed work item"
            );
            return Ok(Some(item));
        }
        Ok(None)
    }

    async fn requeue_expired(
        &self,
        visibility_timeout: Duration,
        max_attempts: i32,
    ) -> Result<RequeueReport> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let expired: Vec<Uuid> = state
            .claimed
            .iter()
            .filter(|(_, (_, claimed_at))| now.duration_since(*claimed_at) >= visibility_timeout)
            .map(|(id, _)| *id)
            .collect();

        let mut report = RequeueReport::default();
        for id in expired {
            let Some((mut item, _)) = state.claimed.remove(&id) else {
                continue;
            };
            let live = state
                .jobs
                .get(&item.job_id)
                .is_some_and(|job| !job.status.is_terminal());
            if !live {
                continue;
            }
            if item.attempts >= max_attempts {
                item.claim_token = Uuid::now_v7();
                state.claimed.insert(id, (item.clone(), now));
                report.abandoned.push(item);
            } else {
                item.claim_token = Uuid::nil();
                report.requeued.push(item);
            }
        }

        // Redelivered items go back to the head of the line in enqueue order.
        report
            .requeued
            .sort_by_key(|item| (item.job_id, item.position));
        for item in report.requeued.iter().rev() {
            state.queued.push_front(item.clone());
        }
        drop(state);

        if !report.is_empty() {
            warn!(
                subsystem = "db",
                component = "queue",
                op = "requeue_expired",
                requeued = report.requeued.len(),
                abandoned = report.abandoned.len(),
                "Recovered expired claims"
            );
        }
        if !report.requeued.is_empty() {
            self.notify.notify_waiters();
        }
        Ok(report)
    }

    async fn queued_count(&self) -> Result<i64> {
        let state = self.state.lock().await;
        let count = state
            .queued
            .iter()
            .filter(|item| {
                state
                    .jobs
                    .get(&item.job_id)
                    .is_some_and(|job| !job.status.is_terminal())
            })
            .count();
        Ok(count as i64)
    }

    fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

#[async_trait]
impl StatusTracker for InMemoryStore {
    async fn report(&self, item: &WorkItem, outcome: &ItemOutcome) -> Result<ReportAck> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let job = state
            .jobs
            .get_mut(&item.job_id)
            .ok_or(Error::JobNotFound(item.job_id))?;

        if !holds_claim(&state.claimed, item) {
            debug!(
                subsystem = "db",
                component = "status",
                op = "report",
                job_id = %item.job_id,
                url = %item.url,
                "Ignoring duplicate or stale report"
            );
            return Ok(ReportAck {
                view: job.view(),
                retired: false,
                finished: false,
            });
        }

        state.claimed.remove(&item.id);
        let applied = job.apply(outcome);
        if applied {
            match job.status {
                JobStatus::Failed => {
                    let before = state.queued.len();
                    state.queued.retain(|queued| queued.job_id != item.job_id);
                    warn!(
                        subsystem = "db",
                        component = "status",
                        op = "report",
                        job_id = %job.id,
                        discarded = before - state.queued.len(),
                        error = job.error_message.as_deref().unwrap_or_default(),
                        "Job failed"
                    );
                }
                JobStatus::Complete => info!(
                    subsystem = "db",
                    component = "status",
                    op = "report",
                    job_id = %job.id,
                    item_count = job.total_items,
                    extraction_errors = job.extraction_errors,
                    "Job complete"
                ),
                JobStatus::Pending | JobStatus::Running => {}
            }
        }
        Ok(ReportAck {
            view: job.view(),
            retired: true,
            finished: applied && job.status.is_terminal(),
        })
    }

    async fn fail_job(&self, job_id: Uuid, reason: &str) -> Result<JobStatusView> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        if job.fail(reason) {
            let before = state.queued.len() + state.claimed.len();
            state.queued.retain(|queued| queued.job_id != job_id);
            state.claimed.retain(|_, (claimed, _)| claimed.job_id != job_id);
            warn!(
                subsystem = "db",
                component = "status",
                op = "fail_job",
                job_id = %job_id,
                discarded = before - state.queued.len() - state.claimed.len(),
                error = reason,
                "Job failed"
            );
        }
        Ok(job.view())
    }

    async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&job_id)
            .map(Job::view)
            .ok_or(Error::JobNotFound(job_id))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }
}

#[async_trait]
impl ResultRepository for InMemoryStore {
    async fn upsert(&self, job_id: Uuid, result: &ExtractionResult) -> Result<()> {
        let record = stored(job_id, result);
        self.state
            .lock()
            .await
            .results
            .insert(record.url.clone(), record);
        Ok(())
    }

    async fn upsert_claimed(&self, item: &WorkItem, result: &ExtractionResult) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !holds_claim(&state.claimed, item) {
            debug!(
                subsystem = "db",
                component = "results",
                op = "upsert_claimed",
                job_id = %item.job_id,
                url = %item.url,
                "Claim superseded, result not stored"
            );
            return Ok(false);
        }
        let record = stored(item.job_id, result);
        state.results.insert(record.url.clone(), record);
        Ok(true)
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<StoredResult>> {
        Ok(self.state.lock().await.results.get(url).cloned())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create(&self, username: &str, hashed_password: &str) -> Result<User> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(username) {
            return Err(Error::InvalidInput(
                "Username already registered".to_string(),
            ));
        }
        let user = User {
            id: Uuid::now_v7(),
            username: username.to_string(),
            hashed_password: hashed_password.to_string(),
            created_at: Utc::now(),
        };
        state.users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_dequeue_follows_submission_order() {
        let store = InMemoryStore::new();
        store
            .submit(urls(&["http://a.test", "http://b.test"]), None)
            .await
            .unwrap();
        store.submit(urls(&["http://c.test"]), None).await.unwrap();

        let mut seen = Vec::new();
        while let Some(item) = store.dequeue().await.unwrap() {
            seen.push(item.url);
        }
        assert_eq!(seen, ["http://a.test", "http://b.test", "http://c.test"]);
    }

    #[tokio::test]
    async fn test_duplicate_urls_are_separate_items() {
        let store = InMemoryStore::new();
        let job_id = store
            .submit(urls(&["http://a.test", "http://a.test"]), None)
            .await
            .unwrap();

        let first = store.dequeue().await.unwrap().unwrap();
        let second = store.dequeue().await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!((first.position, second.position), (0, 1));
        assert_eq!(store.get_status(job_id).await.unwrap().total_items, 2);
    }

    #[tokio::test]
    async fn test_empty_submission_is_complete() {
        let store = InMemoryStore::new();
        let job_id = store.submit(Vec::new(), None).await.unwrap();

        let view = store.get_status(job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Complete);
        assert_eq!(view.total_items, 0);
        assert!(store.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_status(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_storage_failure_discards_remaining_items() {
        let store = InMemoryStore::new();
        let failing = store
            .submit(urls(&["http://a.test", "http://b.test", "http://c.test"]), None)
            .await
            .unwrap();
        let healthy = store.submit(urls(&["http://d.test"]), None).await.unwrap();

        let item = store.dequeue().await.unwrap().unwrap();
        let ack = store
            .report(&item, &ItemOutcome::StorageFailed("disk full".into()))
            .await
            .unwrap();
        assert!(ack.retired);
        assert!(ack.finished);
        assert_eq!(ack.view.status, JobStatus::Failed);
        assert_eq!(ack.view.processed_items, 1);

        let next = store.dequeue().await.unwrap().unwrap();
        assert_eq!(next.job_id, healthy);
        assert!(store.dequeue().await.unwrap().is_none());
        assert_eq!(
            store.get_status(failing).await.unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_duplicate_report_is_ignored() {
        let store = InMemoryStore::new();
        let job_id = store
            .submit(urls(&["http://a.test", "http://b.test"]), None)
            .await
            .unwrap();

        let item = store.dequeue().await.unwrap().unwrap();
        let first = store.report(&item, &ItemOutcome::Extracted).await.unwrap();
        let second = store.report(&item, &ItemOutcome::Extracted).await.unwrap();

        assert!(first.retired);
        assert!(!second.retired);
        assert!(!second.finished);
        assert_eq!(second.view.processed_items, 1);
        assert_eq!(
            store.get_status(job_id).await.unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn test_only_the_completing_report_finishes_the_job() {
        let store = InMemoryStore::new();
        store
            .submit(urls(&["http://a.test", "http://b.test"]), None)
            .await
            .unwrap();

        let a = store.dequeue().await.unwrap().unwrap();
        let b = store.dequeue().await.unwrap().unwrap();
        assert!(!store.report(&a, &ItemOutcome::Extracted).await.unwrap().finished);
        let last = store.report(&b, &ItemOutcome::Extracted).await.unwrap();
        assert!(last.finished);
        assert_eq!(last.view.status, JobStatus::Complete);

        let replay = store.report(&b, &ItemOutcome::Extracted).await.unwrap();
        assert!(!replay.finished);
        assert_eq!(replay.view.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_fail_job_releases_claimed_and_queued_items() {
        let store = InMemoryStore::new();
        let job_id = store
            .submit(urls(&["http://a.test", "http://b.test", "http://c.test"]), None)
            .await
            .unwrap();
        let claimed = store.dequeue().await.unwrap().unwrap();

        let view = store
            .fail_job(job_id, "status store unreachable")
            .await
            .unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error_message.as_deref(), Some("status store unreachable"));
        assert_eq!(store.in_flight_count().await, 0);
        assert!(store.dequeue().await.unwrap().is_none());

        // The late report of the released claim is not counted.
        let ack = store.report(&claimed, &ItemOutcome::Extracted).await.unwrap();
        assert!(!ack.retired);
        assert_eq!(ack.view.processed_items, 0);

        // Failing again keeps the first reason.
        let view = store.fail_job(job_id, "other").await.unwrap();
        assert_eq!(view.error_message.as_deref(), Some("status store unreachable"));
    }

    #[tokio::test]
    async fn test_fail_job_unknown_id() {
        let store = InMemoryStore::new();
        let err = store.fail_job(Uuid::now_v7(), "x").await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_expired_redelivers_then_abandons() {
        let store = InMemoryStore::new();
        store.submit(urls(&["http://slow.test"]), None).await.unwrap();

        let first = store.dequeue().await.unwrap().unwrap();
        assert_eq!(first.attempts, 1);

        let report = store
            .requeue_expired(Duration::from_secs(30), 2)
            .await
            .unwrap();
        assert!(report.is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let report = store
            .requeue_expired(Duration::from_secs(30), 2)
            .await
            .unwrap();
        assert_eq!(report.requeued.len(), 1);

        let second = store.dequeue().await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        let report = store
            .requeue_expired(Duration::from_secs(30), 2)
            .await
            .unwrap();
        assert!(report.requeued.is_empty());
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(store.in_flight_count().await, 1);
        assert!(store.dequeue().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_claim_cannot_write_or_report() {
        let store = InMemoryStore::new();
        let job_id = store.submit(urls(&["http://slow.test"]), None).await.unwrap();
        let original = store.dequeue().await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        let report = store
            .requeue_expired(Duration::from_secs(30), 1)
            .await
            .unwrap();
        let abandoned = report.abandoned.into_iter().next().unwrap();
        assert_eq!(abandoned.id, original.id);
        assert_ne!(abandoned.claim_token, original.claim_token);

        let late = ExtractionResult::success("http://slow.test", "Late", "", "");
        assert!(!store.upsert_claimed(&original, &late).await.unwrap());
        let ack = store.report(&original, &ItemOutcome::Extracted).await.unwrap();
        assert!(!ack.retired);
        assert!(store.get_by_url("http://slow.test").await.unwrap().is_none());

        let error = ExtractionResult::failure("http://slow.test", "abandoned");
        assert!(store.upsert_claimed(&abandoned, &error).await.unwrap());
        let ack = store
            .report(&abandoned, &ItemOutcome::ExtractionFailed("abandoned".into()))
            .await
            .unwrap();
        assert!(ack.retired);
        assert!(ack.finished);

        let view = store.get_status(job_id).await.unwrap();
        assert_eq!(view.extraction_errors, 1);
        let stored = store.get_by_url("http://slow.test").await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("abandoned"));
    }

    #[tokio::test]
    async fn test_results_upsert_overwrites_by_url() {
        let store = InMemoryStore::new();
        let job_a = Uuid::now_v7();
        let job_b = Uuid::now_v7();

        store
            .upsert(job_a, &ExtractionResult::failure("http://a.test", "timeout"))
            .await
            .unwrap();
        store
            .upsert(
                job_b,
                &ExtractionResult::success("http://a.test", "A", "desc", "k1,k2"),
            )
            .await
            .unwrap();

        let stored = store.get_by_url("http://a.test").await.unwrap().unwrap();
        assert_eq!(stored.title, "A");
        assert!(stored.error.is_none());
        assert_eq!(stored.job_id, Some(job_b));
        assert!(store.get_by_url("http://b.test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = InMemoryStore::new();
        store.create("alice", "hash").await.unwrap();
        let err = store.create("alice", "other").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.find_by_username("alice").await.unwrap().is_some());
        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }
}
