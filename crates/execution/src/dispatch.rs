//! Result dispatcher - forwards cycle results to the sink off the loop.

use cycler_core::CycleResult;
use cycler_sink::ResultSink;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn the task that publishes results in arrival order.
///
/// The queue holds at most `capacity` results. The loop only ever
/// `try_send`s into it, so a slow or failing sink never delays the next
/// cycle. The task exits once every sender is dropped and the queue is
/// drained.
pub(crate) fn spawn(
    sink: Arc<dyn ResultSink>,
    capacity: usize,
) -> (mpsc::Sender<CycleResult>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<CycleResult>(capacity);

    let handle = tokio::spawn(async move {
        while let Some(result) = rx.recv().await {
            if let Err(e) = sink.publish(&result).await {
                warn!("Failed to publish cycle {} to '{}': {}", result.cycle_id, sink.name(), e);
            }
        }
        debug!("Result dispatcher for '{}' drained", sink.name());
    });

    (tx, handle)
}
