//! In-memory [`Queue`] test double.
//!
//! Grounded on `acton_htmx::jobs::testing::TestJobQueue`: a `Mutex`-guarded
//! collection that lets the worker pool and queue gauge be unit tested
//! without a live Postgres instance.

use super::{backoff_for, Job, JobId, Queue, QueueError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// In-memory job store used by unit tests.
#[derive(Default)]
pub struct InMemoryQueue {
    jobs: Mutex<Vec<Job>>,
    next_id: Mutex<JobId>,
}

impl InMemoryQueue {
    /// Create an empty in-memory queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().expect("queue mutex poisoned")
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(
        &self,
        type_tag: &str,
        payload: Vec<u8>,
        run_after: Option<DateTime<Utc>>,
    ) -> Result<Job, QueueError> {
        let now = Utc::now();
        let mut next_id = self.next_id.lock().expect("id mutex poisoned");
        let id = *next_id;
        *next_id += 1;

        let job = Job {
            id,
            type_tag: type_tag.to_string(),
            payload,
            active_at: run_after.unwrap_or(now),
            retry_count: 0,
            worker_id: None,
            lease_expires_at: None,
            completed: false,
            created_at: now,
        };
        self.lock().push(job.clone());
        Ok(job)
    }

    async fn reserve(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.lock();
        let candidate = jobs
            .iter_mut()
            .filter(|j| {
                !j.completed
                    && j.active_at <= now
                    && (j.worker_id.is_none()
                        || j.lease_expires_at.is_some_and(|exp| exp <= now))
            })
            .min_by(|a, b| a.active_at.cmp(&b.active_at).then(a.id.cmp(&b.id)));

        let Some(job) = candidate else {
            return Ok(None);
        };

        job.worker_id = Some(worker_id.to_string());
        job.lease_expires_at = Some(
            now + chrono::Duration::from_std(lease_duration).unwrap_or(chrono::Duration::zero()),
        );
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut jobs = self.lock();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.completed = true;
            job.worker_id = None;
            job.lease_expires_at = None;
        }
        Ok(())
    }

    async fn retry(&self, job_id: JobId, retry_count: u32) -> Result<(), QueueError> {
        let mut jobs = self.lock();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.worker_id = None;
            job.lease_expires_at = None;
            job.retry_count = retry_count;
            match backoff_for(retry_count) {
                Some(delay) => {
                    job.active_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                }
                None => job.completed = true,
            }
        }
        Ok(())
    }

    async fn unlock(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut jobs = self.lock();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.worker_id = None;
            job.lease_expires_at = None;
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock().iter().filter(|j| !j.completed).count())
    }

    async fn retry_queue_lengths(&self) -> Result<BTreeMap<u32, usize>, QueueError> {
        let mut histogram = BTreeMap::new();
        for job in self.lock().iter().filter(|j| !j.completed) {
            *histogram.entry(job.retry_count).or_insert(0) += 1;
        }
        Ok(histogram)
    }
}
