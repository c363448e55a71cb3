//! Queue gauge (§4.H): a periodic ticker that logs the queue's current
//! depth and per-retry-bucket backlog as structured `tracing` events
//! rather than a bespoke metrics exporter (§9 Design Note: "metrics are
//! structured log lines, not a scrape endpoint"). Grounded on
//! `examples/original_source/metrics/queue_gauge.go`.

use crate::queue::Queue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Runs the queue gauge loop until `shutdown` is cancelled.
///
/// Queue errors are logged and swallowed — the gauge is advisory and must
/// never take the process down (§4.H).
pub async fn run(queue: Arc<dyn Queue>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("queue gauge shutting down");
                return;
            }
            _ = ticker.tick() => {
                report(queue.as_ref()).await;
            }
        }
    }
}

async fn report(queue: &dyn Queue) {
    match queue.len().await {
        Ok(length) => tracing::info!(kind = "gauge", name = "queue-length", value = length, "queue depth"),
        Err(err) => {
            tracing::warn!(error = %err, "failed to read queue length for gauge");
            return;
        }
    }

    match queue.retry_queue_lengths().await {
        Ok(buckets) => {
            for (retry_count, count) in buckets {
                tracing::info!(
                    kind = "gauge",
                    name = format!("queue-retry-counts.{retry_count}"),
                    value = count,
                    "queue retry bucket depth"
                );
            }
        }
        Err(err) => tracing::warn!(error = %err, "failed to read retry bucket lengths for gauge"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;

    #[tokio::test]
    async fn test_report_does_not_panic_on_empty_queue() {
        let queue = InMemoryQueue::new();
        report(&queue).await;
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        run(queue, Duration::from_millis(10), shutdown).await;
    }
}
