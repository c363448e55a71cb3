//! Durable job queue (§4.A).
//!
//! The queue is the one piece of cross-worker shared mutable state in the
//! system (§5). [`Queue`] is a trait so the worker pool and metrics gauge
//! can be exercised against [`memory::InMemoryQueue`] in unit tests without
//! a live Postgres, and against [`postgres::PgQueue`] in production.

mod memory;
mod postgres;

pub use memory::InMemoryQueue;
pub use postgres::PgQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Opaque job identifier.
pub type JobId = i64;

/// Errors surfaced by the queue backing store.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing database returned an error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The job payload could not be serialized for persistence.
    #[error("payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The job payload could not be sealed/opened (§4.E, §9 AEAD cloak).
    #[error("payload encryption error: {0}")]
    Encryption(#[from] crate::encryption::CloakError),
}

/// A durable unit of work (§3 Job entity).
#[derive(Debug, Clone)]
pub struct Job {
    /// Opaque identifier, assigned by the store on enqueue.
    pub id: JobId,
    /// The `type_tag` derived from the payload's `JobType` envelope field
    /// (`"campaign"`, `"v1"`, `"v2"`).
    pub type_tag: String,
    /// Encrypted-at-rest payload bytes.
    pub payload: Vec<u8>,
    /// Instant the job becomes leaseable.
    pub active_at: DateTime<Utc>,
    /// Number of failed delivery attempts so far.
    pub retry_count: u32,
    /// Logical id of the worker currently holding the lease, if any.
    pub worker_id: Option<String>,
    /// Instant the current lease expires, if any.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Whether the job has reached a terminal state.
    pub completed: bool,
    /// Instant the job was first enqueued.
    pub created_at: DateTime<Utc>,
}

/// Maximum `retry_count` before a job is marked dead (§4.A backoff table).
pub const MAX_RETRY_COUNT: u32 = 10;

/// The fixed backoff schedule from spec.md §4.A. `retry_count` is 1-based
/// after the first failure; `retry_count` values beyond the table (≥11)
/// are terminal and never scheduled.
#[must_use]
pub fn backoff_for(retry_count: u32) -> Option<Duration> {
    match retry_count {
        1 => Some(Duration::from_secs(60)),
        2 => Some(Duration::from_secs(2 * 60)),
        3 => Some(Duration::from_secs(15 * 60)),
        4 => Some(Duration::from_secs(60 * 60)),
        5 => Some(Duration::from_secs(2 * 60 * 60)),
        6 => Some(Duration::from_secs(4 * 60 * 60)),
        7 => Some(Duration::from_secs(8 * 60 * 60)),
        8 => Some(Duration::from_secs(16 * 60 * 60)),
        9 | 10 => Some(Duration::from_secs(24 * 60 * 60)),
        _ => None,
    }
}

/// Durable job queue contract (§4.A).
#[async_trait]
pub trait Queue: Send + Sync {
    /// Persist a new job. Defaults `active_at` to now unless `run_after`
    /// is given.
    async fn enqueue(
        &self,
        type_tag: &str,
        payload: Vec<u8>,
        run_after: Option<DateTime<Utc>>,
    ) -> Result<Job, QueueError>;

    /// Atomically select and lease the oldest reservable job, if any, for
    /// `lease_duration` (§5 `WorkerSettings::lease_duration`). Selection
    /// order: ascending `active_at`, then ascending `id`.
    async fn reserve(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Option<Job>, QueueError>;

    /// Mark a job completed, releasing its lease.
    async fn complete(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Clear the lease, increment `retry_count`, and schedule the next
    /// `active_at` via [`backoff_for`].
    async fn retry(&self, job_id: JobId, retry_count: u32) -> Result<(), QueueError>;

    /// Clear the lease without incrementing `retry_count` (transient
    /// worker error unrelated to job content, §4.A).
    async fn unlock(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Count of pending (non-completed) jobs.
    async fn len(&self) -> Result<usize, QueueError>;

    /// Returns `true` if there are no pending jobs.
    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Histogram of pending jobs keyed by `retry_count` (§4.H).
    async fn retry_queue_lengths(&self) -> Result<BTreeMap<u32, usize>, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_matches_spec_table() {
        assert_eq!(backoff_for(1), Some(Duration::from_secs(60)));
        assert_eq!(backoff_for(2), Some(Duration::from_secs(120)));
        assert_eq!(backoff_for(3), Some(Duration::from_secs(900)));
        assert_eq!(backoff_for(10), Some(Duration::from_secs(86_400)));
        assert_eq!(backoff_for(11), None);
        assert_eq!(backoff_for(100), None);
    }

    #[test]
    fn test_backoff_is_monotonically_increasing() {
        let mut prev = Duration::from_secs(0);
        for retry_count in 1..=MAX_RETRY_COUNT {
            let delay = backoff_for(retry_count).expect("within schedule");
            assert!(delay >= prev, "backoff must not decrease");
            prev = delay;
        }
    }
}
