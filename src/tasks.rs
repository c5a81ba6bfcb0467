use chrono::{DateTime, Local, TimeZone};
use croner::Cron;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::app::UpstreamFetcher;
use crate::error::MirrorError;

/// Background refresh: an optional immediate update, then one unforced
/// update per `schedule` tick (local time) until `cancel` fires.
/// Failures are logged and the loop keeps going.
pub async fn run_refresh_loop(
    fetcher: Arc<UpstreamFetcher>,
    schedule: Cron,
    update_on_startup: bool,
    cancel: CancellationToken,
) {
    if update_on_startup {
        refresh_once(&fetcher, &cancel).await;
    }

    loop {
        let now = Local::now();
        let Some((next, wait)) = next_run(&schedule, &now) else {
            error!("Update schedule has no future occurrence, stopping scheduler");
            return;
        };
        info!(timestamp = %next, wait_secs = wait.as_secs(), "Waiting for next update");

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Scheduler stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => refresh_once(&fetcher, &cancel).await,
        }
    }
}

/// Next tick strictly after `now` and how long until it.
fn next_run<Tz: TimeZone>(schedule: &Cron, now: &DateTime<Tz>) -> Option<(DateTime<Tz>, Duration)> {
    let next = schedule.find_next_occurrence(now, false).ok()?;
    let wait = (next.clone() - now.clone()).to_std().unwrap_or_default();
    Some((next, wait))
}

async fn refresh_once(fetcher: &UpstreamFetcher, cancel: &CancellationToken) {
    match fetcher.fetch(false, cancel).await {
        Ok(issue) => info!(issue = %issue, "Update finished"),
        Err(MirrorError::Cancelled) => debug!("Update cancelled"),
        Err(e) => error!(error = %e, "Update failed"),
    }
}
