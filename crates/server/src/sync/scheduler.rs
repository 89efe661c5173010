use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::service::RouterService;

use super::SyncKind;

/// Runs "sync all" against the active profile every `period_seconds`.
/// Returns `None` when the period is 0.
pub fn spawn_periodic_sync(service: Arc<RouterService>, period_seconds: u64) -> Option<JoinHandle<()>> {
    if period_seconds == 0 {
        info!("Periodic sync is disabled.");
        return None;
    }
    let period = Duration::from_secs(period_seconds);
    Some(tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_seconds = period_seconds, "Periodic sync task started.");

        loop {
            interval.tick().await;
            run_once(&service).await;
        }
    }))
}

async fn run_once(service: &RouterService) {
    match service.sync_active(SyncKind::All).await {
        Ok(Some(report)) if report.is_failed() => {
            warn!(profile_id = report.profile_id, summary = %report.summary(), "Scheduled sync could not connect.");
        }
        Ok(Some(report)) => {
            info!(profile_id = report.profile_id, summary = %report.summary(), "Scheduled sync finished.");
        }
        Ok(None) => debug!("No active connection profile; scheduled sync skipped."),
        Err(CoreError::Busy { profile_id, .. }) => {
            warn!(profile_id, "A sync is already running; scheduled sync skipped.");
        }
        Err(e) => error!(error = %e, "Scheduled sync failed."),
    }
}
