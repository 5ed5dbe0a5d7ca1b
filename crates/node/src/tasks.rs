//! Periodic service tasks.

use estuary_disruptor::BatchRangeDispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn the periodic transaction batch flush.
///
/// The returned handle is aborted on shutdown; the tick is the only place
/// batched ranges are submitted to the transaction dispatcher.
pub fn spawn_batch_transaction_task(
    batch_dispatcher: Arc<BatchRangeDispatcher>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        debug!(interval_ms = interval.as_millis() as u64, "batch transaction task started");
        loop {
            ticker.tick().await;
            batch_dispatcher.dispatch();
        }
    })
}
