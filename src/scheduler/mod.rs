//! Scheduler: admission policy, dispatch, pressure response and timeouts.
//!
//! Owns the queue, pool and resource monitor. Background loops (dispatch,
//! resource, timeout sweep, history pruning) are started and stopped
//! together.

mod dispatch;
mod pressure;
mod sweep;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{NodeConfig, SchedulerConfig};
use crate::error::{Error, SchedulerError};
use crate::executor::ExecutorRegistry;
use crate::pool::{PoolStatus, WorkerPool};
use crate::queue::{QueueStatus, TaskQueue};
use crate::registry::{RegistrySummary, TaskRegistry};
use crate::resources::{ResourceMonitor, ResourceProbe};
use crate::source::{ResultSink, TaskOutcome};
use crate::task::{StatusReason, Task, TaskRecord};

/// A dispatched task and the driver running it.
struct InFlight {
    started_at: Instant,
    handle: JoinHandle<()>,
}

/// An in-flight task as shown in status snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct InFlightTask {
    pub id: String,
    pub running_for_ms: u64,
}

/// Scheduler status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub active_tasks: usize,
    pub in_flight: Vec<InFlightTask>,
    pub queue: QueueStatus,
    pub pool: PoolStatus,
    pub tasks: RegistrySummary,
    pub under_pressure: bool,
    pub config: SchedulerConfig,
}

pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<TaskRegistry>,
    queue: Arc<TaskQueue>,
    pool: Arc<WorkerPool>,
    monitor: Arc<ResourceMonitor>,
    executors: Arc<ExecutorRegistry>,
    results: Arc<dyn ResultSink>,
    in_flight: RwLock<HashMap<String, InFlight>>,
    running: AtomicBool,
    /// Set for the duration of one pressure episode.
    draining: AtomicBool,
    /// Wakes the dispatch loop early (new task, freed slot).
    dispatch_wake: Notify,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Wire up the registry, queue, pool and monitor from `config`.
    pub fn new(
        config: &NodeConfig,
        probe: Arc<dyn ResourceProbe>,
        executors: Arc<ExecutorRegistry>,
        results: Arc<dyn ResultSink>,
    ) -> Arc<Self> {
        let registry = Arc::new(TaskRegistry::new(&config.registry));
        let queue = Arc::new(TaskQueue::new(&config.queue, Arc::clone(&registry)));
        let pool = Arc::new(WorkerPool::new(&config.pool));
        let monitor = Arc::new(ResourceMonitor::new(
            probe,
            config.resources.clone(),
            config.scheduler.resource_poll_interval,
        ));

        Arc::new(Self {
            config: config.scheduler.clone(),
            registry,
            queue,
            pool,
            monitor,
            executors,
            results,
            in_flight: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            dispatch_wake: Notify::new(),
            loops: Mutex::new(Vec::new()),
        })
    }

    /// Start the pool and the background loops. Pool startup failure is
    /// the only fatal error.
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        if self.running.load(Ordering::SeqCst) {
            debug!("Scheduler already running");
            return Ok(());
        }

        self.pool.start().await?;
        self.running.store(true, Ordering::SeqCst);
        self.queue.set_accepting(true);

        let mut loops = self.loops.lock().await;
        loops.push(self.spawn_dispatch_loop());
        loops.push(self.spawn_resource_loop());
        loops.push(self.spawn_timeout_sweep());
        loops.push(self.spawn_history_prune_loop());

        info!(
            max_concurrent = self.config.max_concurrent_tasks,
            workers = self.pool.size(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop accepting work, stop the loops and the pool, and cancel every
    /// task still tracked with reason `shutdown`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.queue.set_accepting(false);

        for handle in self.loops.lock().await.drain(..) {
            handle.abort();
        }

        for id in self.queue.flush(StatusReason::Shutdown).await {
            self.report(&id, None).await;
        }

        let in_flight: Vec<(String, InFlight)> = self.in_flight.write().await.drain().collect();
        for (id, flight) in in_flight {
            self.queue
                .cancel_with_reason(&id, StatusReason::Shutdown)
                .await;
            flight.handle.abort();
            self.pool.cancel(&id).await;
            self.report(&id, None).await;
        }

        self.pool.stop().await;
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a pressure episode is draining right now.
    pub fn under_pressure(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Admit a task: validate, check resources, enqueue. Each step short
    /// circuits, so a rejected task never reaches the queue or registry.
    pub async fn schedule_task(&self, task: Task, priority: bool) -> Result<(), SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        task.validate()?;
        if !self.executors.has(&task.task_type).await {
            return Err(SchedulerError::UnknownTaskType {
                task_type: task.task_type.clone(),
            });
        }
        if !self.queue.is_accepting() {
            return Err(SchedulerError::ResourcePressure);
        }
        if !self.monitor.check_resources().await {
            warn!(task_id = %task.id, "Insufficient resources, task not admitted");
            return Err(SchedulerError::InsufficientResources);
        }

        self.queue.enqueue(task, priority).await?;
        self.dispatch_wake.notify_one();
        Ok(())
    }

    /// Cancel a task whether queued or in flight. Idempotent.
    pub async fn cancel_task(&self, id: &str) -> bool {
        let was_active = self
            .registry
            .get(id)
            .await
            .is_some_and(|record| record.status.is_active());
        // Holding the read guard keeps dispatch from moving the task out of
        // the queue between the check and the cancel.
        let in_flight = {
            let guard = self.in_flight.read().await;
            let in_flight = guard.contains_key(id);
            self.queue.cancel(id).await;
            in_flight
        };
        self.pool.cancel(id).await;

        // In-flight drivers report their own outcome.
        if was_active && !in_flight {
            self.report(id, None).await;
        }
        true
    }

    pub async fn status(&self) -> SchedulerStatus {
        let in_flight: Vec<InFlightTask> = {
            let map = self.in_flight.read().await;
            let mut tasks: Vec<InFlightTask> = map
                .iter()
                .map(|(id, flight)| InFlightTask {
                    id: id.clone(),
                    running_for_ms: flight.started_at.elapsed().as_millis() as u64,
                })
                .collect();
            tasks.sort_by(|a, b| a.id.cmp(&b.id));
            tasks
        };

        SchedulerStatus {
            running: self.is_running(),
            active_tasks: in_flight.len(),
            in_flight,
            queue: self.queue.status().await,
            pool: self.pool.status().await,
            tasks: self.registry.summary().await,
            under_pressure: self.under_pressure(),
            config: self.config.clone(),
        }
    }

    pub async fn task(&self, id: &str) -> Option<TaskRecord> {
        self.registry.get(id).await
    }

    pub async fn active_tasks(&self) -> Vec<TaskRecord> {
        self.registry.list_active().await
    }

    pub async fn history(&self, limit: Option<usize>) -> Vec<TaskRecord> {
        self.registry.list_history(limit).await
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.read().await.len()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn executors(&self) -> &Arc<ExecutorRegistry> {
        &self.executors
    }

    /// Send the terminal outcome of `id` to the result sink.
    async fn report(&self, id: &str, result: Option<Value>) {
        let Some(record) = self.registry.get(id).await else {
            // Already evicted from a small history; a result still means success.
            match result {
                Some(result) => self.submit(id, TaskOutcome::Completed { result }).await,
                None => warn!(task_id = %id, "No record to report"),
            }
            return;
        };
        let Some(outcome) = TaskOutcome::from_record(&record, result) else {
            warn!(task_id = %id, status = %record.status, "Task not terminal, nothing to report");
            return;
        };
        self.submit(id, outcome).await;
    }

    async fn submit(&self, id: &str, outcome: TaskOutcome) {
        if let Err(e) = self.results.submit_result(id, outcome).await {
            warn!(task_id = %id, error = %e, "Failed to submit task result");
        }
    }
}
