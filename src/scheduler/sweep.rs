//! Timeout sweep and history pruning.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{InFlight, Scheduler};

impl Scheduler {
    pub(super) fn spawn_timeout_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "Timeout sweep started (interval: {}s, timeout: {}s)",
                this.config.timeout_check_interval.as_secs_f64(),
                this.config.task_timeout.as_secs_f64()
            );

            let mut tick = tokio::time::interval(this.config.timeout_check_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while this.is_running() {
                tick.tick().await;
                this.sweep_timeouts().await;
            }
        })
    }

    /// Forcibly cancel every in-flight task past the timeout and record it
    /// FAILED with reason timeout. Returns the ids that timed out.
    pub async fn sweep_timeouts(&self) -> Vec<String> {
        let expired: Vec<(String, InFlight)> = {
            let mut in_flight = self.in_flight.write().await;
            let ids: Vec<String> = in_flight
                .iter()
                .filter(|(_, flight)| flight.started_at.elapsed() > self.config.task_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| in_flight.remove_entry(&id))
                .collect()
        };

        let mut timed_out = Vec::with_capacity(expired.len());
        for (id, flight) in expired {
            warn!(
                task_id = %id,
                elapsed_secs = flight.started_at.elapsed().as_secs(),
                "Task exceeded timeout, cancelling"
            );
            self.queue.time_out(&id).await;
            flight.handle.abort();
            self.pool.cancel(&id).await;
            self.report(&id, None).await;
            timed_out.push(id);
        }

        if !timed_out.is_empty() {
            self.dispatch_wake.notify_one();
        }
        timed_out
    }

    pub(super) fn spawn_history_prune_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(this.config.history_prune_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while this.is_running() {
                tick.tick().await;
                let removed = this
                    .registry
                    .prune_history(this.config.history_retention)
                    .await;
                debug!(removed, "History prune pass");
            }
        })
    }
}
