//! Cron-driven loop for the updates processor.
//!
//! A cycle is awaited to completion before the next fire time is computed, so
//! cycles never overlap. The host creates one `UpdatesProcessor` and lends it
//! to `run`; there is no global registration.

use std::future::Future;
use std::str::FromStr;

use chrono::Utc;
use cron::Schedule;
use tracing::{error, info};

use crate::updates::{CycleOutcome, UpdatesProcessor};

pub fn parse_schedule(expr: &str) -> anyhow::Result<Schedule> {
    Schedule::from_str(expr).map_err(|e| anyhow::anyhow!("invalid cron expression {expr:?}: {e}"))
}

/// Fire `processor` on every tick of `schedule` until `shutdown` resolves.
pub async fn run<S>(processor: &UpdatesProcessor, schedule: &Schedule, shutdown: S)
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            info!("schedule has no further fire times; stopping");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        info!(next = %next, "next update cycle scheduled");

        tokio::select! {
            _ = &mut shutdown => {
                info!("scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        match processor.process().await {
            Ok(CycleOutcome::Skipped) => info!("update cycle skipped"),
            Ok(CycleOutcome::Processed(report)) => {
                info!(emails_sent = report.emails_sent, "update cycle completed")
            }
            Err(err) => error!(?err, "update cycle failed"),
        }
    }
}
