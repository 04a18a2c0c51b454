//! Background queue flushing.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::client::SyncClient;

/// Flush the offline queue until shutdown.
///
/// Flushes when `online` flips from false to true and on every `interval`
/// tick while online. A closed `online` channel counts as always online.
pub async fn run_flush_loop(
    client: SyncClient,
    mut online: watch::Receiver<bool>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(?interval, "Starting flush loop");

    let mut was_online = *online.borrow_and_update();
    let mut watching = true;
    let mut interval_timer = tokio::time::interval(interval);
    interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                if was_online && client.queue_len() > 0 {
                    let report = client.flush_queue().await;
                    debug!(flushed = report.flushed, remaining = report.remaining, "periodic flush");
                }
            }
            changed = online.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    was_online = true;
                    continue;
                }
                let now_online = *online.borrow_and_update();
                if now_online && !was_online {
                    info!(queued = client.queue_len(), "connectivity restored; flushing queue");
                    client.flush_queue().await;
                }
                was_online = now_online;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Flush loop shutting down");
                    break;
                }
            }
        }
    }
}
