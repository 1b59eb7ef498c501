//! Job queue and status tracker backed by PostgreSQL.
//!
//! Jobs live in `scrape_job`; each URL is a row in `work_item` until its
//! outcome is reported. Claiming uses `FOR UPDATE SKIP LOCKED` so any number
//! of workers (in any number of processes) can pull from the same table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use metascrape_core::{
    Error, ItemOutcome, Job, JobQueue, JobStatus, JobStatusView, ReportAck, RequeueReport,
    Result, StatusTracker, WorkItem,
};

const JOB_COLUMNS: &str = "id, urls, status::text AS status, total_items, processed_items, \
     extraction_errors, error_message, submitted_by, created_at, started_at, completed_at";

const ITEM_COLUMNS: &str = "id, job_id, position, url, attempts, claim_token";

/// PostgreSQL implementation of [`JobQueue`] and [`StatusTracker`].
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Wakes idle workers when items are enqueued.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a repository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    fn parse_job_row(row: PgRow) -> Result<Job> {
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            urls: row.get("urls"),
            status: status.parse()?,
            total_items: row.get("total_items"),
            processed_items: row.get("processed_items"),
            extraction_errors: row.get("extraction_errors"),
            error_message: row.get("error_message"),
            submitted_by: row.get("submitted_by"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }

    fn parse_item_row(row: PgRow) -> WorkItem {
        WorkItem {
            id: row.get("id"),
            job_id: row.get("job_id"),
            position: row.get("position"),
            url: row.get("url"),
            attempts: row.get("attempts"),
            claim_token: row
                .get::<Option<Uuid>, _>("claim_token")
                .unwrap_or_default(),
        }
    }
}

impl Clone for PgJobRepository {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            notify: self.notify.clone(),
        }
    }
}

#[async_trait]
impl JobQueue for PgJobRepository {
    async fn submit(&self, urls: Vec<String>, submitted_by: Option<&str>) -> Result<Uuid> {
        let job = Job::new(urls, submitted_by.map(str::to_string));

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO scrape_job (id, urls, status, total_items, submitted_by, created_at, completed_at)
             VALUES ($1, $2, $3::job_status, $4, $5, $6, $7)",
        )
        .bind(job.id)
        .bind(&job.urls)
        .bind(job.status.as_str())
        .bind(job.total_items)
        .bind(&job.submitted_by)
        .bind(job.created_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if !job.urls.is_empty() {
            let ids: Vec<Uuid> = job.urls.iter().map(|_| Uuid::now_v7()).collect();
            let positions: Vec<i32> = (0..job.total_items).collect();

            sqlx::query(
                "INSERT INTO work_item (id, job_id, position, url, created_at)
                 SELECT u.id, $2, u.position, u.url, $5
                 FROM UNNEST($1::uuid[], $3::int4[], $4::text[]) AS u(id, position, url)",
            )
            .bind(&ids)
            .bind(job.id)
            .bind(&positions)
            .bind(&job.urls)
            .bind(job.created_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "queue",
            op = "submit",
            job_id = %job.id,
            item_count = job.total_items,
            "Job submitted"
        );

        if job.total_items > 0 {
            self.notify.notify_waiters();
        }
        Ok(job.id)
    }

    async fn dequeue(&self) -> Result<Option<WorkItem>> {
        let row = sqlx::query(&format!(
            "UPDATE work_item
             SET claimed_at = $1, claim_token = $2, attempts = attempts + 1
             WHERE id = (
                 SELECT w.id FROM work_item w
                 JOIN scrape_job j ON j.id = w.job_id
                 WHERE w.claimed_at IS NULL
                   AND j.status IN ('pending'::job_status, 'running'::job_status)
                 ORDER BY w.created_at ASC, w.job_id ASC, w.position ASC
                 LIMIT 1
                 FOR UPDATE OF w SKIP LOCKED
             )
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(Uuid::now_v7())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let item = row.map(Self::parse_item_row);
        if let Some(item) = &item {
            debug!(
                subsystem = "db",
                component = "queue",
                op = "dequeue",
                job_id = %item.job_id,
                url = %item.url,
                attempt = item.attempts,
                "Claimed work item"
            );
        }
        Ok(item)
    }

    async fn requeue_expired(
        &self,
        visibility_timeout: Duration,
        max_attempts: i32,
    ) -> Result<RequeueReport> {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(visibility_timeout)
            .map_err(|e| Error::Config(format!("visibility timeout out of range: {e}")))?;
        let cutoff = now - timeout;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Stale claims on terminal jobs have nobody left to account for them.
        sqlx::query(
            "DELETE FROM work_item w
             USING scrape_job j
             WHERE j.id = w.job_id
               AND j.status IN ('complete'::job_status, 'failed'::job_status)
               AND w.claimed_at < $1",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let requeued = sqlx::query(&format!(
            "UPDATE work_item SET claimed_at = NULL, claim_token = NULL
             WHERE claimed_at < $1 AND attempts < $2
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(cutoff)
        .bind(max_attempts)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?
        .into_iter()
        .map(Self::parse_item_row)
        .collect::<Vec<_>>();

        // Exhausted items are claimed afresh by the caller.
        let abandoned = sqlx::query(&format!(
            "UPDATE work_item SET claimed_at = $3, claim_token = gen_random_uuid()
             WHERE claimed_at < $1 AND attempts >= $2
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(cutoff)
        .bind(max_attempts)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?
        .into_iter()
        .map(Self::parse_item_row)
        .collect::<Vec<_>>();

        tx.commit().await.map_err(Error::Database)?;

        if !requeued.is_empty() || !abandoned.is_empty() {
            warn!(
                subsystem = "db",
                component = "queue",
                op = "requeue_expired",
                requeued = requeued.len(),
                abandoned = abandoned.len(),
                "Recovered expired claims"
            );
        }
        if !requeued.is_empty() {
            self.notify.notify_waiters();
        }

        Ok(RequeueReport {
            requeued,
            abandoned,
        })
    }

    async fn queued_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM work_item w
             JOIN scrape_job j ON j.id = w.job_id
             WHERE w.claimed_at IS NULL
               AND j.status IN ('pending'::job_status, 'running'::job_status)",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

#[async_trait]
impl StatusTracker for PgJobRepository {
    async fn report(&self, item: &WorkItem, outcome: &ItemOutcome) -> Result<ReportAck> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM scrape_job WHERE id = $1 FOR UPDATE"
        ))
        .bind(item.job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::JobNotFound(item.job_id))?;
        let mut job = Self::parse_job_row(row)?;

        let retired = sqlx::query("DELETE FROM work_item WHERE id = $1 AND claim_token = $2")
            .bind(item.id)
            .bind(item.claim_token)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        if retired == 0 {
            // Already reported, or the claim was superseded.
            tx.commit().await.map_err(Error::Database)?;
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

        let applied = job.apply(outcome);
        if applied {
            sqlx::query(
                "UPDATE scrape_job
                 SET status = $2::job_status, processed_items = $3, extraction_errors = $4,
                     error_message = $5, started_at = $6, completed_at = $7
                 WHERE id = $1",
            )
            .bind(job.id)
            .bind(job.status.as_str())
            .bind(job.processed_items)
            .bind(job.extraction_errors)
            .bind(&job.error_message)
            .bind(job.started_at)
            .bind(job.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            if job.status == JobStatus::Failed {
                let discarded =
                    sqlx::query("DELETE FROM work_item WHERE job_id = $1 AND claimed_at IS NULL")
                        .bind(job.id)
                        .execute(&mut *tx)
                        .await
                        .map_err(Error::Database)?
                        .rows_affected();
                warn!(
                    subsystem = "db",
                    component = "status",
                    op = "report",
                    job_id = %job.id,
                    discarded,
                    error = job.error_message.as_deref().unwrap_or_default(),
                    "Job failed"
                );
            }
        }

        tx.commit().await.map_err(Error::Database)?;

        if job.status == JobStatus::Complete {
            info!(
                subsystem = "db",
                component = "status",
                op = "report",
                job_id = %job.id,
                item_count = job.total_items,
                extraction_errors = job.extraction_errors,
                "Job complete"
            );
        }
        Ok(ReportAck {
            finished: applied && job.status.is_terminal(),
            view: job.view(),
            retired: true,
        })
    }

    async fn fail_job(&self, job_id: Uuid, reason: &str) -> Result<JobStatusView> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM scrape_job WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::JobNotFound(job_id))?;
        let mut job = Self::parse_job_row(row)?;

        if job.fail(reason) {
            sqlx::query(
                "UPDATE scrape_job
                 SET status = 'failed', error_message = $2, completed_at = $3
                 WHERE id = $1",
            )
            .bind(job.id)
            .bind(&job.error_message)
            .bind(job.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            let discarded = sqlx::query("DELETE FROM work_item WHERE job_id = $1")
                .bind(job.id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?
                .rows_affected();
            warn!(
                subsystem = "db",
                component = "status",
                op = "fail_job",
                job_id = %job.id,
                discarded,
                error = reason,
                "Job failed"
            );
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(job.view())
    }

    async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView> {
        self.get_job(job_id)
            .await?
            .map(|job| job.view())
            .ok_or(Error::JobNotFound(job_id))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM scrape_job WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(Self::parse_job_row).transpose()
    }
}
