//! Staffing board sync agent
//!
//! Keeps the current shift's board in sync with the remote API:
//!
//! - Loads and merges the board for the current (date, shift)
//! - Restores writes queued by an earlier run
//! - Flushes the offline queue periodically until shutdown
//! - Refreshes the board when another handle changes it

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, Timelike};
use edsb_board::{Shift, StaticConfig};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use edsb_sync::flush::run_flush_loop;
use edsb_sync::session::ACTIVE_KEY;
use edsb_sync::{
    notifier_from_config, BoardMemo, BoardSession, Config, FileCache, HttpRemote, LocalCache,
    SyncClient, SyncNotice, SyncOptions,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to EDSB_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting board sync");
    info!(
        api_url = %config.api_url,
        cache_dir = %config.cache_dir.display(),
        zones = config.zones.zones.len(),
        notifier = %config.notifier,
        "Configuration loaded"
    );

    let cache: Arc<dyn LocalCache> = Arc::new(
        FileCache::open(&config.cache_dir).context("Failed to open local cache directory")?,
    );
    let remote = Arc::new(HttpRemote::new(&config).context("Failed to create API client")?);
    let client = SyncClient::new(remote, cache.clone(), SyncOptions::from_config(&config));

    let restored = client.restore_queue().context("Failed to restore offline queue")?;
    if restored > 0 {
        info!(restored, "Restored queued writes from previous run");
    }

    let notices = tokio::spawn(log_notices(client.subscribe_notices()));

    let notifier = notifier_from_config(config.notifier, cache);
    let mut changes = notifier.subscribe();
    let origin = notifier.origin();

    let now = Local::now();
    let date = now.date_naive();
    let shift = Shift::for_hour(now.hour());
    let mut session = BoardSession::load(
        client.clone(),
        notifier,
        Arc::new(StaticConfig(config.zones.clone())),
        BoardMemo::new(),
        date,
        shift,
    )
    .await
    .with_context(|| format!("Failed to load the {shift} board for {date}"))?;

    let board = session.board();
    info!(
        date = %board.date_iso,
        shift = %board.shift,
        charge = board.charge.as_ref().map(|s| s.nurse_id.as_str()).unwrap_or("-"),
        triage = board.triage.as_ref().map(|s| s.nurse_id.as_str()).unwrap_or("-"),
        admin = board.admin.as_ref().map(|s| s.nurse_id.as_str()).unwrap_or("-"),
        queued = client.queue_len(),
        "Board ready"
    );

    // No platform connectivity signal here; the interval does the probing.
    let (_online_tx, online_rx) = watch::channel(true);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flush_handle = tokio::spawn(run_flush_loop(
        client.clone(),
        online_rx,
        config.flush_interval,
        shutdown_rx,
    ));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            event = changes.recv() => match event {
                Ok(event) if event.key == ACTIVE_KEY && event.origin != origin => {
                    if session.refresh_from_cache() {
                        info!("Board refreshed after peer update");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed change notifications; refreshing");
                    session.refresh_from_cache();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Change notifier closed");
                    break;
                }
            },
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = flush_handle.await {
        error!(error = %e, "Flush loop task panicked");
    }

    // Deliver pending debounced saves, then one last queue attempt.
    session.flush().await;
    let report = client.flush_queue().await;
    if report.remaining > 0 {
        warn!(remaining = report.remaining, "Exiting with queued writes; they will be retried on next start");
    }

    notices.abort();
    info!("Board sync shutdown complete");
    Ok(())
}

async fn log_notices(mut notices: broadcast::Receiver<SyncNotice>) {
    loop {
        match notices.recv().await {
            Ok(SyncNotice::PriorAssignmentCleared { nurse_id }) => {
                info!(nurse_id = %nurse_id, "Prior assignment cleared")
            }
            Ok(SyncNotice::ServerUnreachable { queued }) => {
                warn!(queued, "Saving locally; server unreachable")
            }
            Ok(SyncNotice::ServerRecovered) => info!("Server reachable; local changes synced"),
            Ok(SyncNotice::NoCachedCopy { key }) => {
                error!(key = %key, "No cached copy available and server unreachable")
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed sync notices")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
