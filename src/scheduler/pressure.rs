//! Resource loop and pressure draining.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::Scheduler;
use crate::task::StatusReason;

impl Scheduler {
    pub(super) fn spawn_resource_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "Resource loop started (interval: {}s)",
                this.config.resource_poll_interval.as_secs_f64()
            );

            let mut tick = tokio::time::interval(this.config.resource_poll_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while this.is_running() {
                tick.tick().await;
                let health = this.monitor.poll().await;
                if health.healthy {
                    continue;
                }

                warn!(violations = ?health.violations, "Resource pressure detected");
                // Drain in the background so sampling continues; the
                // episode guard absorbs repeat detections.
                let drainer = Arc::clone(&this);
                tokio::spawn(async move { drainer.on_pressure_detected().await });
            }
        })
    }

    /// Drain the node: stop admissions, cancel queued tasks, wait for
    /// in-flight tasks to finish, then resume admissions.
    ///
    /// Returns false without doing anything if an episode is already
    /// draining. Admissions are restored exactly once per episode.
    pub async fn on_pressure_detected(&self) -> bool {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Pressure episode already draining");
            return false;
        }

        self.queue.set_accepting(false);

        let flushed = self.queue.flush(StatusReason::ResourcePressure).await;
        for id in &flushed {
            self.report(id, None).await;
        }

        let in_flight = self.in_flight_count().await;
        info!(
            flushed = flushed.len(),
            in_flight, "Draining under resource pressure"
        );

        while self.is_running() && self.in_flight_count().await > 0 {
            tokio::time::sleep(self.config.queue_poll_interval).await;
        }

        if self.is_running() {
            self.queue.set_accepting(true);
            info!("Resource pressure drained, admissions resumed");
        }
        self.draining.store(false, Ordering::SeqCst);
        true
    }
}
