//! Periodic scheduler status reporting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::scheduler::{Scheduler, SchedulerStatus};

/// Receives status snapshots.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn report_status(&self, status: &SchedulerStatus) -> anyhow::Result<()>;
}

/// Writes a one-line summary of each snapshot to the log.
pub struct LogTelemetrySink;

#[async_trait]
impl TelemetrySink for LogTelemetrySink {
    async fn report_status(&self, status: &SchedulerStatus) -> anyhow::Result<()> {
        info!(
            running = status.running,
            in_flight = status.active_tasks,
            queued_priority = status.queue.priority_depth,
            queued_normal = status.queue.normal_depth,
            busy_workers = status.pool.busy,
            completed = status.tasks.completed,
            failed = status.tasks.failed,
            cancelled = status.tasks.cancelled,
            under_pressure = status.under_pressure,
            "Scheduler status"
        );
        Ok(())
    }
}

/// Spawn a loop sending a status snapshot to `sink` every `interval` until
/// the scheduler stops.
pub fn spawn_status_reporter(
    scheduler: Arc<Scheduler>,
    sink: Arc<dyn TelemetrySink>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            if !scheduler.is_running() {
                break;
            }
            let status = scheduler.status().await;
            if let Err(e) = sink.report_status(&status).await {
                warn!(error = %e, "Failed to report scheduler status");
            }
        }
    })
}
