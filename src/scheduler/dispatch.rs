//! Dispatch loop and per-task drivers.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::{InFlight, Scheduler};
use crate::error::ExecutorError;
use crate::executor::Executor;
use crate::task::Task;

impl Scheduler {
    pub(super) fn spawn_dispatch_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "Dispatch loop started (poll: {}ms)",
                this.config.queue_poll_interval.as_millis()
            );

            let mut tick = tokio::time::interval(this.config.queue_poll_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while this.is_running() {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = this.dispatch_wake.notified() => {}
                }
                this.dispatch_ready().await;
            }
        })
    }

    /// Dispatch queued tasks while there is concurrency headroom and an
    /// idle worker.
    ///
    /// In-flight is capped at the pool size, so every driver has a worker
    /// to run on. The `in_flight` write lock is held from dequeue to insert:
    /// a task is always visible either in the queue or in flight.
    async fn dispatch_ready(self: &Arc<Self>) {
        let limit = self.max_in_flight();
        loop {
            if !self.is_running() {
                return;
            }
            let mut in_flight = self.in_flight.write().await;
            if in_flight.len() >= limit {
                return;
            }
            if !self.pool.has_idle_worker().await {
                return;
            }
            let Some(task) = self.queue.dequeue().await else {
                return;
            };

            let executor = self.executors.get(&task.task_type).await;
            let id = task.id.clone();
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move { this.drive(task, executor).await });
            in_flight.insert(
                id.clone(),
                InFlight {
                    started_at: Instant::now(),
                    handle,
                },
            );
            debug!(task_id = %id, in_flight = in_flight.len(), "Task dispatched");
        }
    }

    /// Effective concurrency: never more drivers than workers.
    fn max_in_flight(&self) -> usize {
        self.config.max_concurrent_tasks.min(self.pool.size())
    }

    /// Run one task through the queue's retry policy on the pool, then
    /// report the outcome.
    async fn drive(self: Arc<Self>, task: Task, executor: Option<Arc<dyn Executor>>) {
        let result = self
            .queue
            .process_with_retry(&task, || {
                let pool = Arc::clone(&self.pool);
                let task = task.clone();
                let executor = executor.clone();
                async move {
                    match executor {
                        Some(executor) => pool.run(task, executor).await,
                        None => Err(ExecutorError::UnknownType(task.task_type)),
                    }
                }
            })
            .await;

        // The timeout sweep and shutdown take ownership of the entry and
        // report on the driver's behalf.
        let owned = self.in_flight.write().await.remove(&task.id).is_some();
        if owned {
            self.report(&task.id, result).await;
        }
        self.dispatch_wake.notify_one();
    }
}
