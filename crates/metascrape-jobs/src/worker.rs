//! Worker pool that drains the job queue through the extractor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use metascrape_core::{
    defaults, Error, ExtractionResult, ItemOutcome, JobQueue, JobStatus, JobStatusView,
    MetadataExtractor, Result, ResultRepository, StatusTracker, WorkItem,
};

use crate::extractor::{ExtractorConfig, HttpExtractor};

/// What happens to items claimed by a worker that never reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedeliveryPolicy {
    /// Claimed items stay claimed forever.
    #[default]
    Disabled,
    /// Items claimed longer than `timeout` go back to the queue, up to
    /// `max_attempts` deliveries; after that they are recorded as failed.
    VisibilityTimeout { timeout: Duration, max_attempts: i32 },
}

/// Exponential backoff for status reports that fail transiently.
///
/// Once `max_attempts` reports have failed the job is failed outright, so a
/// claimed item is never left unaccounted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRetry {
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for ReportRetry {
    fn default() -> Self {
        Self {
            max_attempts: defaults::REPORT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(defaults::REPORT_RETRY_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(defaults::REPORT_RETRY_MAX_DELAY_MS),
        }
    }
}

impl ReportRetry {
    /// Delay following `current`: doubled, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Whether to process items at all.
    pub enabled: bool,
    pub redelivery: RedeliveryPolicy,
    pub report_retry: ReportRetry,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            worker_count: defaults::WORKER_COUNT,
            enabled: true,
            redelivery: RedeliveryPolicy::Disabled,
            report_retry: ReportRetry::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable item processing |
    /// | `WORKER_COUNT` | `4` | Concurrent workers |
    /// | `WORKER_POLL_INTERVAL_MS` | `5000` | Idle poll interval |
    /// | `REDELIVERY_VISIBILITY_TIMEOUT_SECS` | unset | Enables redelivery when set |
    /// | `REDELIVERY_MAX_ATTEMPTS` | `3` | Deliveries before an item is abandoned |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let worker_count = std::env::var("WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::WORKER_COUNT)
            .max(1);

        let poll_interval_ms = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::WORKER_POLL_INTERVAL_MS);

        let redelivery = match std::env::var("REDELIVERY_VISIBILITY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            Some(secs) if secs > 0 => RedeliveryPolicy::VisibilityTimeout {
                timeout: Duration::from_secs(secs),
                max_attempts: std::env::var("REDELIVERY_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse::<i32>().ok())
                    .unwrap_or(defaults::REDELIVERY_MAX_ATTEMPTS)
                    .max(1),
            },
            _ => RedeliveryPolicy::Disabled,
        };

        Self {
            poll_interval_ms,
            worker_count,
            enabled,
            redelivery,
            report_retry: ReportRetry::default(),
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_redelivery(mut self, policy: RedeliveryPolicy) -> Self {
        self.redelivery = policy;
        self
    }

    pub fn with_report_retry(mut self, retry: ReportRetry) -> Self {
        self.report_retry = retry;
        self
    }
}

/// Event emitted by the worker pool.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker loop started.
    WorkerStarted { worker: usize },
    /// A worker loop exited.
    WorkerStopped { worker: usize },
    /// One item's outcome was recorded.
    ItemProcessed {
        job_id: Uuid,
        url: String,
        outcome: ItemOutcome,
        status: JobStatus,
    },
    /// A job reached `complete` or `failed`.
    JobFinished { job_id: Uuid, status: JobStatus },
    /// The redelivery sweeper recovered expired claims.
    ItemsRequeued { requeued: usize, abandoned: usize },
}

/// Service handles one item needs: fetch, store, report.
#[derive(Clone)]
pub struct Pipeline {
    queue: Arc<dyn JobQueue>,
    tracker: Arc<dyn StatusTracker>,
    results: Arc<dyn ResultRepository>,
    extractor: Arc<dyn MetadataExtractor>,
    report_retry: ReportRetry,
}

/// How one item's outcome was accounted for.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub outcome: ItemOutcome,
    pub view: JobStatusView,
    /// This item moved its job into a terminal state.
    pub finished: bool,
}

impl Pipeline {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        tracker: Arc<dyn StatusTracker>,
        results: Arc<dyn ResultRepository>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Self {
        Self {
            queue,
            tracker,
            results,
            extractor,
            report_retry: ReportRetry::default(),
        }
    }

    pub fn with_report_retry(mut self, retry: ReportRetry) -> Self {
        self.report_retry = retry;
        self
    }

    /// Extract one claimed item, store its result and report the outcome.
    pub async fn process(&self, item: &WorkItem) -> Result<Option<Recorded>> {
        let result = self.extractor.extract(&item.url).await;
        self.record(item, result).await
    }

    /// Store `result` for `item`, then report. The report is sent only after
    /// the write is acknowledged; a failed write is reported as
    /// [`ItemOutcome::StorageFailed`].
    ///
    /// Returns `None` when the claim was superseded (redelivered or
    /// abandoned) before the item could be accounted for; nothing is written
    /// or counted in that case.
    pub async fn record(
        &self,
        item: &WorkItem,
        result: ExtractionResult,
    ) -> Result<Option<Recorded>> {
        let outcome = match self.results.upsert_claimed(item, &result).await {
            Ok(true) => ItemOutcome::from_result(&result),
            Ok(false) => {
                debug!(
                    subsystem = "jobs",
                    component = "worker",
                    op = "store",
                    job_id = %item.job_id,
                    url = %item.url,
                    "Claim superseded, dropping result"
                );
                return Ok(None);
            }
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    op = "store",
                    job_id = %item.job_id,
                    url = %item.url,
                    error = %e,
                    "Result storage failed"
                );
                ItemOutcome::StorageFailed(e.to_string())
            }
        };

        let acked = self.report(item, outcome).await?;
        if !acked.retired && !acked.finished {
            debug!(
                subsystem = "jobs",
                component = "worker",
                op = "report",
                job_id = %item.job_id,
                url = %item.url,
                "Claim superseded before report"
            );
            return Ok(None);
        }
        Ok(Some(acked.into()))
    }

    /// Report with bounded exponential backoff. When every attempt fails the
    /// job is failed, which also releases the item's claim.
    async fn report(&self, item: &WorkItem, outcome: ItemOutcome) -> Result<Acked> {
        let retry = &self.report_retry;
        let mut delay = retry.initial_delay;
        let mut attempt = 1;

        let last_error = loop {
            match self.tracker.report(item, &outcome).await {
                Ok(ack) => {
                    return Ok(Acked {
                        outcome,
                        retired: ack.retired,
                        finished: ack.finished,
                        view: ack.view,
                    })
                }
                Err(e @ Error::JobNotFound(_)) => return Err(e),
                Err(e) if attempt >= retry.max_attempts => break e,
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        op = "report",
                        job_id = %item.job_id,
                        url = %item.url,
                        attempt,
                        error = %e,
                        "Status report failed, retrying"
                    );
                    sleep(delay).await;
                    delay = retry.next_delay(delay);
                    attempt += 1;
                }
            }
        };

        error!(
            subsystem = "jobs",
            component = "worker",
            op = "report",
            job_id = %item.job_id,
            url = %item.url,
            attempts = attempt,
            error = %last_error,
            "Status report failed, failing job"
        );
        let reason = format!("Status update failed: {last_error}");
        let view = self.tracker.fail_job(item.job_id, &reason).await?;
        Ok(Acked {
            finished: failed_with(&view, &reason),
            outcome,
            retired: false,
            view,
        })
    }
}

/// Tracker acknowledgement paired with the outcome that was reported.
struct Acked {
    outcome: ItemOutcome,
    view: JobStatusView,
    retired: bool,
    finished: bool,
}

impl From<Acked> for Recorded {
    fn from(acked: Acked) -> Self {
        Recorded {
            outcome: acked.outcome,
            view: acked.view,
            finished: acked.finished,
        }
    }
}

/// Whether `view` is a job failed by exactly `reason`.
fn failed_with(view: &JobStatusView, reason: &str) -> bool {
    view.status == JobStatus::Failed && view.error_message.as_deref() == Some(reason)
}

/// Handle for controlling a running worker pool.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    supervisor: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal every worker to stop and wait until each has finished its
    /// in-flight item.
    pub async fn shutdown(self) -> Result<()> {
        // Send fails only if every loop already exited.
        let _ = self.shutdown_tx.send(true);
        self.supervisor
            .await
            .map_err(|e| Error::Internal(format!("Worker supervisor panicked: {e}")))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Pool of workers pulling from one queue.
pub struct JobWorker {
    pipeline: Pipeline,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(pipeline: Pipeline, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            pipeline,
            config,
            event_tx,
        }
    }

    /// Spawn the worker loops (and the sweeper, if redelivery is enabled).
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let event_rx = self.event_tx.subscribe();
        let worker = Arc::new(self);

        let supervisor = tokio::spawn(async move {
            worker.supervise(shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            supervisor,
        }
    }

    async fn supervise(self: Arc<Self>, shutdown_rx: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!(
                subsystem = "jobs",
                component = "worker",
                "Worker pool is disabled, not starting"
            );
            return;
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            worker_count = self.config.worker_count,
            poll_interval_ms = self.config.poll_interval_ms,
            redelivery = ?self.config.redelivery,
            "Worker pool started"
        );

        let mut tasks = JoinSet::new();
        for index in 0..self.config.worker_count {
            let worker = self.clone();
            let shutdown = shutdown_rx.clone();
            tasks.spawn(async move { worker.run_loop(index, shutdown).await });
        }
        if let RedeliveryPolicy::VisibilityTimeout {
            timeout,
            max_attempts,
        } = self.config.redelivery
        {
            let worker = self.clone();
            let shutdown = shutdown_rx.clone();
            tasks.spawn(async move { worker.sweep_loop(timeout, max_attempts, shutdown).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(subsystem = "jobs", component = "worker", error = ?e, "Worker task panicked");
            }
        }
        info!(subsystem = "jobs", component = "worker", "Worker pool stopped");
    }

    async fn run_loop(&self, index: usize, mut shutdown: watch::Receiver<bool>) {
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted { worker: index });
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let notify = self.pipeline.queue.notifier();

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Register for wake-ups before looking, so a submission that lands
            // between an empty dequeue and the wait is not missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.pipeline.queue.dequeue().await {
                Ok(Some(item)) => {
                    self.handle_item(index, item).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        op = "dequeue",
                        worker = index,
                        error = %e,
                        "Failed to claim work item"
                    );
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = &mut notified => {}
                _ = sleep(poll_interval) => {}
            }
        }

        debug!(subsystem = "jobs", component = "worker", worker = index, "Worker stopped");
        let _ = self.event_tx.send(WorkerEvent::WorkerStopped { worker: index });
    }

    async fn handle_item(&self, index: usize, item: WorkItem) {
        let start = Instant::now();
        match self.pipeline.process(&item).await {
            Ok(Some(recorded)) => {
                debug!(
                    subsystem = "jobs",
                    component = "worker",
                    op = "process",
                    worker = index,
                    job_id = %item.job_id,
                    url = %item.url,
                    outcome = recorded.outcome.kind(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Processed work item"
                );
                self.publish(item, recorded);
            }
            Ok(None) => {}
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    op = "report",
                    worker = index,
                    job_id = %item.job_id,
                    url = %item.url,
                    error = %e,
                    "Failed to account for work item"
                );
            }
        }
    }

    fn publish(&self, item: WorkItem, recorded: Recorded) {
        let _ = self.event_tx.send(WorkerEvent::ItemProcessed {
            job_id: item.job_id,
            url: item.url,
            outcome: recorded.outcome,
            status: recorded.view.status,
        });
        if recorded.finished {
            let _ = self.event_tx.send(WorkerEvent::JobFinished {
                job_id: recorded.view.job_id,
                status: recorded.view.status,
            });
        }
    }

    async fn sweep_loop(
        &self,
        timeout: Duration,
        max_attempts: i32,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = (timeout / 2).max(Duration::from_millis(10));
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = sleep(period) => {
                    if let Err(e) = self.sweep(timeout, max_attempts).await {
                        error!(
                            subsystem = "jobs",
                            component = "sweeper",
                            op = "requeue_expired",
                            error = %e,
                            "Redelivery sweep failed"
                        );
                    }
                }
            }
        }
    }

    /// Recover expired claims once. Abandoned items are recorded as
    /// extraction failures under the sweeper's claim.
    pub async fn sweep(&self, timeout: Duration, max_attempts: i32) -> Result<()> {
        let report = self
            .pipeline
            .queue
            .requeue_expired(timeout, max_attempts)
            .await?;
        if report.is_empty() {
            return Ok(());
        }

        for item in &report.abandoned {
            warn!(
                subsystem = "jobs",
                component = "sweeper",
                job_id = %item.job_id,
                url = %item.url,
                attempt = item.attempts,
                "Abandoning work item"
            );
            let message = format!("abandoned after {} delivery attempts", item.attempts);
            let failure = ExtractionResult::failure(&item.url, message);
            if let Some(recorded) = self.pipeline.record(item, failure).await? {
                self.publish(item.clone(), recorded);
            }
        }

        let _ = self.event_tx.send(WorkerEvent::ItemsRequeued {
            requeued: report.requeued.len(),
            abandoned: report.abandoned.len(),
        });
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Items waiting to be claimed.
    pub async fn queued_count(&self) -> Result<i64> {
        self.pipeline.queue.queued_count().await
    }
}

/// Builder for a worker pool.
pub struct WorkerBuilder {
    queue: Arc<dyn JobQueue>,
    tracker: Arc<dyn StatusTracker>,
    results: Arc<dyn ResultRepository>,
    extractor: Option<Arc<dyn MetadataExtractor>>,
    config: WorkerConfig,
}

impl WorkerBuilder {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        tracker: Arc<dyn StatusTracker>,
        results: Arc<dyn ResultRepository>,
    ) -> Self {
        Self {
            queue,
            tracker,
            results,
            extractor: None,
            config: WorkerConfig::default(),
        }
    }

    /// Use one backend for queue, status and results.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: JobQueue + StatusTracker + ResultRepository + 'static,
    {
        Self::new(store.clone(), store.clone(), store)
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the extractor. Defaults to [`HttpExtractor`] configured from
    /// the environment.
    pub fn with_extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn build(self) -> Result<JobWorker> {
        let extractor = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(HttpExtractor::new(ExtractorConfig::from_env())?),
        };
        let pipeline = Pipeline::new(self.queue, self.tracker, self.results, extractor)
            .with_report_retry(self.config.report_retry.clone());
        Ok(JobWorker::new(pipeline, self.config))
    }
}
