//! Deadline sweep for reports that never receive every scorer result

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use super::orchestrator::ReportOrchestrator;
use crate::signals::ShutdownSignal;

/// Spawn the reaper, sweeping every `interval` until shutdown
pub fn spawn_reaper(
    orchestrator: Arc<ReportOrchestrator>,
    interval: Duration,
    shutdown: broadcast::Receiver<ShutdownSignal>,
) -> tokio::task::JoinHandle<()> {
    crate::bus::spawn_supervised("report_reaper", reaper_loop(orchestrator, interval, shutdown))
}

async fn reaper_loop(
    orchestrator: Arc<ReportOrchestrator>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                match orchestrator.expire_overdue(Utc::now()).await {
                    Ok(0) => {}
                    Ok(expired) => tracing::info!(expired = expired, "Timed out overdue reports"),
                    Err(e) => tracing::error!(error = %e, "Report sweep failed"),
                }
            }
        }
    }
}
