use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::InMemoryExampleIndex;

/// Runs `compact` every `interval` until `cancel` fires.
pub fn spawn_compactor(
    index: Arc<InMemoryExampleIndex>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("example index compactor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let report = index.compact();
                    if report.partitions_compacted > 0 {
                        debug!(?report, "compaction round finished");
                    }
                }
            }
        }
    })
}
