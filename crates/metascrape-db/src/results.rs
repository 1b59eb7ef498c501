//! Extraction result storage.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, trace};
use uuid::Uuid;

use metascrape_core::{
    Error, ExtractionResult, Result, ResultRepository, StoredResult, WorkItem,
};

/// PostgreSQL implementation of [`ResultRepository`]. One row per URL.
#[derive(Clone)]
pub struct PgResultRepository {
    pool: Pool<Postgres>,
}

impl PgResultRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: PgRow) -> StoredResult {
        StoredResult {
            url: row.get("url"),
            title: row.get("title"),
            description: row.get("description"),
            keywords: row.get("keywords"),
            error: row.get("error"),
            job_id: row.get("job_id"),
            updated_at: row.get("updated_at"),
        }
    }
}

const UPSERT: &str = "INSERT INTO scraped_data (url, title, description, keywords, error, job_id, updated_at)
     VALUES ($1, $2, $3, $4, $5, $6, $7)
     ON CONFLICT (url) DO UPDATE
     SET title = EXCLUDED.title,
         description = EXCLUDED.description,
         keywords = EXCLUDED.keywords,
         error = EXCLUDED.error,
         job_id = EXCLUDED.job_id,
         updated_at = EXCLUDED.updated_at";

fn bind_upsert<'q>(
    job_id: Uuid,
    result: &'q ExtractionResult,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(UPSERT)
        .bind(&result.url)
        .bind(&result.title)
        .bind(&result.description)
        .bind(&result.keywords)
        .bind(&result.error)
        .bind(job_id)
        .bind(Utc::now())
}

#[async_trait]
impl ResultRepository for PgResultRepository {
    async fn upsert(&self, job_id: Uuid, result: &ExtractionResult) -> Result<()> {
        bind_upsert(job_id, result)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        trace!(
            subsystem = "db",
            component = "results",
            op = "upsert",
            job_id = %job_id,
            url = %result.url,
            success = result.is_success(),
            "Stored extraction result"
        );
        Ok(())
    }

    async fn upsert_claimed(&self, item: &WorkItem, result: &ExtractionResult) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // The share lock holds off requeue, abandonment and reports of this
        // item until the write commits.
        let held = sqlx::query("SELECT 1 FROM work_item WHERE id = $1 AND claim_token = $2 FOR SHARE")
            .bind(item.id)
            .bind(item.claim_token)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?
            .is_some();

        if !held {
            tx.rollback().await.map_err(Error::Database)?;
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

        bind_upsert(item.job_id, result)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;

        trace!(
            subsystem = "db",
            component = "results",
            op = "upsert_claimed",
            job_id = %item.job_id,
            url = %result.url,
            success = result.is_success(),
            "Stored extraction result"
        );
        Ok(true)
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<StoredResult>> {
        let row = sqlx::query(
            "SELECT url, title, description, keywords, error, job_id, updated_at
             FROM scraped_data WHERE url = $1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.map(Self::parse_row))
    }
}
