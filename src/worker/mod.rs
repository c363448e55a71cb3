//! Worker pool (§4.B): `count` independent polling loops that reserve a
//! job, decode its `JobType` envelope, dispatch to the matching
//! pipeline, and react to the outcome through [`crate::retry::handle`].
//!
//! Grounded on `examples/original_source/postal/delivery_worker.go` for
//! the poll/dispatch/retry loop shape, and on the teacher's
//! `tracing::info_span!` worker-identification convention.

use crate::config::WorkerSettings;
use crate::delivery::{DeliveryError, DeliveryOutcome, DeliveryWorkflow};
use crate::encryption::Cloak;
use crate::error::Retryable;
use crate::model::{CampaignJob, DeliveryJob, JobEnvelope};
use crate::queue::{Job, Queue};
use crate::retry::{handle, RetryDecision};
use crate::strategy::StrategyDeterminer;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The well-known `type_tag` values a campaign job can carry (§4.B).
const TYPE_CAMPAIGN: &str = "campaign";

/// Spawns and supervises the worker pool (§4.B, §5).
pub struct WorkerGenerator {
    queue: Arc<dyn Queue>,
    cloak: Arc<Cloak>,
    strategy: Arc<StrategyDeterminer>,
    delivery: Arc<DeliveryWorkflow>,
    settings: WorkerSettings,
}

impl WorkerGenerator {
    /// Construct a worker pool generator over its collaborators.
    #[must_use]
    pub const fn new(
        queue: Arc<dyn Queue>,
        cloak: Arc<Cloak>,
        strategy: Arc<StrategyDeterminer>,
        delivery: Arc<DeliveryWorkflow>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            cloak,
            strategy,
            delivery,
            settings,
        }
    }

    /// Spawn `settings.count` worker tasks, each tagged
    /// `{instance_index}-{n}` for multi-process disambiguation. Every task
    /// exits once `shutdown` is cancelled and its current job (if any)
    /// finishes (§4.B graceful shutdown).
    pub fn spawn(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.settings.count)
            .map(|n| {
                let worker_id = format!("{}-{n}", self.settings.instance_index);
                let queue = Arc::clone(&self.queue);
                let cloak = Arc::clone(&self.cloak);
                let strategy = Arc::clone(&self.strategy);
                let delivery = Arc::clone(&self.delivery);
                let max_wait = self.settings.queue_wait_max_duration();
                let lease_duration = self.settings.lease_duration();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    run_worker(
                        worker_id,
                        queue,
                        cloak,
                        strategy,
                        delivery,
                        max_wait,
                        lease_duration,
                        shutdown,
                    )
                    .await;
                })
            })
            .collect()
    }
}

async fn run_worker(
    worker_id: String,
    queue: Arc<dyn Queue>,
    cloak: Arc<Cloak>,
    strategy: Arc<StrategyDeterminer>,
    delivery: Arc<DeliveryWorkflow>,
    max_wait: Duration,
    lease_duration: Duration,
    shutdown: CancellationToken,
) {
    let span = tracing::info_span!("worker", worker_id = %worker_id);
    let _enter = span.enter();
    tracing::info!("worker starting");

    loop {
        if shutdown.is_cancelled() {
            tracing::info!("worker shutting down");
            return;
        }

        let now = chrono::Utc::now();
        let reserved = match queue.reserve(&worker_id, now, lease_duration).await {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(error = %err, "reserve failed");
                None
            }
        };

        match reserved {
            Some(job) => process_job(job, &worker_id, &queue, &cloak, &strategy, &delivery).await,
            None => {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        tracing::info!("worker shutting down");
                        return;
                    }
                    () = tokio::time::sleep(jittered(max_wait)) => {}
                }
            }
        }
    }
}

fn jittered(max: Duration) -> Duration {
    let millis = max.as_millis().max(1);
    #[allow(clippy::cast_possible_truncation)]
    let jitter = rand::thread_rng().gen_range(0..=millis) as u64;
    Duration::from_millis(jitter)
}

async fn process_job(
    job: Job,
    worker_id: &str,
    queue: &Arc<dyn Queue>,
    cloak: &Arc<Cloak>,
    strategy: &Arc<StrategyDeterminer>,
    delivery: &Arc<DeliveryWorkflow>,
) {
    let job_id = job.id;
    let retry_count = job.retry_count;

    let plaintext = match cloak.open(&job.payload) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(job_id, error = %err, "poisoned payload, dead-lettering");
            tracing::info!(
                kind = "counter",
                name = "notifications.worker.panic.json",
                value = 1,
                job_id,
                worker_id,
                "poisoned payload dead-lettered"
            );
            let _ = queue.retry(job_id, u32::MAX).await;
            return;
        }
    };

    let outcome = match job.type_tag.as_str() {
        TYPE_CAMPAIGN => process_campaign(&plaintext, queue.as_ref(), strategy.as_ref()).await,
        "v1" | "v2" => process_delivery(&plaintext, delivery.as_ref()).await,
        other => {
            tracing::error!(job_id, type_tag = other, "unknown job type, dead-lettering");
            Err(true)
        }
    };

    match outcome {
        Ok(()) => {
            if let Err(err) = queue.complete(job_id).await {
                tracing::warn!(job_id, error = %err, "failed to mark job complete");
            }
        }
        Err(retryable) => {
            let decision = handle(&Flag(retryable), retry_count);
            let result = match decision {
                RetryDecision::Retry => queue.retry(job_id, retry_count + 1).await,
                RetryDecision::DeadLetter => {
                    tracing::info!(
                        kind = "counter",
                        name = "notifications.worker.deadletter",
                        value = 1,
                        job_id,
                        worker_id,
                        "job dead-lettered"
                    );
                    queue.retry(job_id, u32::MAX).await
                }
            };
            if let Err(err) = result {
                tracing::warn!(job_id, error = %err, "failed to update job after failure");
            }
        }
    }
}

/// Trivial [`Retryable`] adapter so the worker can feed a bare `bool`
/// through [`crate::retry::handle`] once an error has already been
/// classified.
struct Flag(bool);
impl Retryable for Flag {
    fn is_retryable(&self) -> bool {
        self.0
    }
}

async fn process_campaign(
    payload: &[u8],
    queue: &dyn Queue,
    strategy: &StrategyDeterminer,
) -> Result<(), bool> {
    let envelope: JobEnvelope = serde_json::from_slice(payload).map_err(|_| false)?;
    let _ = envelope;
    let campaign: CampaignJob = serde_json::from_slice(payload).map_err(|_| false)?;

    let jobs = strategy.expand(&campaign).await.map_err(|err| {
        tracing::error!(error = %err, "campaign expansion failed");
        false
    })?;

    for delivery_job in jobs {
        let encoded = serde_json::to_vec(&delivery_job).map_err(|_| true)?;
        let type_tag = match delivery_job.workflow_version {
            crate::model::WorkflowVersion::V1 => "v1",
            crate::model::WorkflowVersion::V2 => "v2",
        };
        queue
            .enqueue(type_tag, encoded, None)
            .await
            .map_err(|_| true)?;
    }
    Ok(())
}

async fn process_delivery(payload: &[u8], delivery: &DeliveryWorkflow) -> Result<(), bool> {
    let job: DeliveryJob = serde_json::from_slice(payload).map_err(|_| false)?;
    match delivery.deliver(&job).await {
        Ok(DeliveryOutcome::Delivered | DeliveryOutcome::Undeliverable) => Ok(()),
        Ok(DeliveryOutcome::Retry) => Err(true),
        Err(DeliveryError::Mail(err)) => Err(err.is_retryable()),
    }
}
