//! Retry & failure handler (§4.G): turns a pipeline-stage error into a
//! queue-level decision. Grounded on `examples/original_source/postal/
//! delivery_worker.go`'s `Handle(job common.Retryable, ...)` shape, paired
//! with [`crate::queue::backoff_for`] for the actual schedule.

use crate::error::Retryable;
use crate::queue::MAX_RETRY_COUNT;

/// What a worker should do with a job after a stage failed (§4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue with backoff; `retry_count` has not hit the ceiling.
    Retry,
    /// Drop the job into the dead-letter state; either terminal or the
    /// retry ceiling has been reached.
    DeadLetter,
}

/// Decide whether `error` should be retried given the job's current
/// `retry_count` (§4.G, §7).
///
/// A terminal error always dead-letters regardless of `retry_count`. A
/// retryable error dead-letters only once `retry_count` has reached
/// [`MAX_RETRY_COUNT`].
#[must_use]
pub fn handle(error: &impl Retryable, retry_count: u32) -> RetryDecision {
    if error.is_retryable() && retry_count < MAX_RETRY_COUNT {
        RetryDecision::Retry
    } else {
        RetryDecision::DeadLetter
    }
}
