//! Postgres-backed [`Queue`] implementation.
//!
//! `Reserve` is a single `UPDATE ... FOR UPDATE SKIP LOCKED` round trip so
//! no transaction is held across SMTP or directory I/O (Design Note §9).

use super::{backoff_for, Job, JobId, Queue, QueueError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use std::time::Duration;

/// Durable job queue backed by a `jobs` table in Postgres.
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the `jobs` table migration. Intended for test setup and first
    /// boot; production deployments are expected to manage migrations
    /// externally (spec.md §1 Non-goals).
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL statement fails.
    pub async fn migrate(&self) -> Result<(), QueueError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS jobs (
                id BIGSERIAL PRIMARY KEY,
                type_tag TEXT NOT NULL,
                payload BYTEA NOT NULL,
                active_at TIMESTAMPTZ NOT NULL,
                retry_count INT NOT NULL DEFAULT 0,
                worker_id TEXT,
                lease_expires_at TIMESTAMPTZ,
                completed BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Job {
        Job {
            id: row.get("id"),
            type_tag: row.get("type_tag"),
            payload: row.get("payload"),
            active_at: row.get("active_at"),
            retry_count: u32::try_from(row.get::<i32, _>("retry_count")).unwrap_or(0),
            worker_id: row.get("worker_id"),
            lease_expires_at: row.get("lease_expires_at"),
            completed: row.get("completed"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn enqueue(
        &self,
        type_tag: &str,
        payload: Vec<u8>,
        run_after: Option<DateTime<Utc>>,
    ) -> Result<Job, QueueError> {
        let active_at = run_after.unwrap_or_else(Utc::now);
        let row = sqlx::query(
            r"
            INSERT INTO jobs (type_tag, payload, active_at)
            VALUES ($1, $2, $3)
            RETURNING id, type_tag, payload, active_at, retry_count, worker_id,
                      lease_expires_at, completed, created_at
            ",
        )
        .bind(type_tag)
        .bind(&payload)
        .bind(active_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(type_tag, "job enqueued");
        Ok(Self::row_to_job(&row))
    }

    async fn reserve(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let lease_expires_at =
            now + chrono::Duration::from_std(lease_duration).unwrap_or(chrono::Duration::zero());
        let row = sqlx::query(
            r"
            UPDATE jobs
            SET worker_id = $1, lease_expires_at = $2
            WHERE id = (
                SELECT id FROM jobs
                WHERE completed = FALSE
                  AND active_at <= $3
                  AND (worker_id IS NULL OR lease_expires_at <= $3)
                ORDER BY active_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, type_tag, payload, active_at, retry_count, worker_id,
                      lease_expires_at, completed, created_at
            ",
        )
        .bind(worker_id)
        .bind(lease_expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_job))
    }

    async fn complete(&self, job_id: JobId) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE jobs SET completed = TRUE, worker_id = NULL, lease_expires_at = NULL WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retry(&self, job_id: JobId, retry_count: u32) -> Result<(), QueueError> {
        let retry_count_i32 = i32::try_from(retry_count).unwrap_or(i32::MAX);
        match backoff_for(retry_count) {
            Some(delay) => {
                let active_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                sqlx::query(
                    r"
                    UPDATE jobs
                    SET worker_id = NULL, lease_expires_at = NULL,
                        retry_count = $1, active_at = $2
                    WHERE id = $3
                    ",
                )
                .bind(retry_count_i32)
                .bind(active_at)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    r"
                    UPDATE jobs
                    SET worker_id = NULL, lease_expires_at = NULL,
                        retry_count = $1, completed = TRUE
                    WHERE id = $2
                    ",
                )
                .bind(retry_count_i32)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn unlock(&self, job_id: JobId) -> Result<(), QueueError> {
        sqlx::query("UPDATE jobs SET worker_id = NULL, lease_expires_at = NULL WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE completed = FALSE")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn retry_queue_lengths(&self) -> Result<BTreeMap<u32, usize>, QueueError> {
        let rows = sqlx::query(
            "SELECT retry_count, COUNT(*) AS count FROM jobs WHERE completed = FALSE GROUP BY retry_count",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut histogram = BTreeMap::new();
        for row in rows {
            let retry_count: i32 = row.get("retry_count");
            let count: i64 = row.get("count");
            histogram.insert(
                u32::try_from(retry_count).unwrap_or(0),
                usize::try_from(count).unwrap_or(0),
            );
        }
        Ok(histogram)
    }
}
