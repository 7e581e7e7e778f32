//! Task queue with a priority lane, a normal lane and retry handling.
//!
//! Dequeue always drains the priority lane first, so continuous priority
//! traffic starves the normal lane.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{ExecutorError, TaskError};
use crate::registry::TaskRegistry;
use crate::task::{StatusReason, Task, TaskStatus};

/// Invoked once with the task id and result after a task completes.
pub type CompletionCallback = Arc<dyn Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Priority,
    Normal,
}

#[derive(Debug)]
struct QueueEntry {
    task: Task,
    lane: Lane,
}

#[derive(Debug, Default)]
struct Lanes {
    priority: VecDeque<QueueEntry>,
    normal: VecDeque<QueueEntry>,
}

impl Lanes {
    fn lane_mut(&mut self, lane: Lane) -> &mut VecDeque<QueueEntry> {
        match lane {
            Lane::Priority => &mut self.priority,
            Lane::Normal => &mut self.normal,
        }
    }
}

/// Point-in-time queue status.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub priority_depth: usize,
    pub normal_depth: usize,
    pub in_flight: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub accepting: bool,
}

/// Admission point for tasks. Records every admitted task in the registry
/// before it becomes visible to `dequeue`.
pub struct TaskQueue {
    registry: Arc<TaskRegistry>,
    lanes: tokio::sync::Mutex<Lanes>,
    /// Cancel signals for tasks inside `process_with_retry`.
    processing: Mutex<HashMap<String, Arc<Notify>>>,
    callbacks: Mutex<HashMap<String, CompletionCallback>>,
    accepting: AtomicBool,
    max_retries: u32,
    retry_delay: Duration,
}

impl TaskQueue {
    pub fn new(config: &QueueConfig, registry: Arc<TaskRegistry>) -> Self {
        Self {
            registry,
            lanes: tokio::sync::Mutex::new(Lanes::default()),
            processing: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Admit a task. The registry entry is created before the task is
    /// pushed, so a failed registration leaves no trace in either lane.
    pub async fn enqueue(&self, task: Task, priority: bool) -> Result<(), TaskError> {
        if !self.is_accepting() {
            debug!(task_id = %task.id, "Rejected task: admissions suspended");
            return Err(TaskError::AdmissionsSuspended);
        }
        task.validate()?;

        let lane = if priority || task.priority {
            Lane::Priority
        } else {
            Lane::Normal
        };

        let mut lanes = self.lanes.lock().await;
        self.registry.create(task.id.clone(), task.task_type.clone()).await?;

        info!(task_id = %task.id, task_type = %task.task_type, lane = ?lane, "Task enqueued");
        lanes.lane_mut(lane).push_back(QueueEntry { task, lane });
        Ok(())
    }

    /// Pop the next task, priority lane first. Never blocks on an empty queue.
    pub async fn dequeue(&self) -> Option<Task> {
        let mut lanes = self.lanes.lock().await;
        let entry = lanes
            .priority
            .pop_front()
            .or_else(|| lanes.normal.pop_front())?;
        debug!(task_id = %entry.task.id, lane = ?entry.lane, "Task dequeued");
        Some(entry.task)
    }

    pub async fn len(&self) -> usize {
        let lanes = self.lanes.lock().await;
        lanes.priority.len() + lanes.normal.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run a dequeued task, retrying failed attempts with linear backoff
    /// (`retry_delay * attempt`).
    ///
    /// `attempt` is called once per try. Returns the result on success.
    /// Returns `None` when retries run out (task FAILED), when the error is
    /// not retryable, or when the task is cancelled or timed out meanwhile.
    pub async fn process_with_retry<F, Fut>(&self, task: &Task, mut attempt: F) -> Option<Value>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, ExecutorError>>,
    {
        let signal = Arc::new(Notify::new());
        self.processing()
            .insert(task.id.clone(), Arc::clone(&signal));
        // Cleans up even if the caller drops this future mid-attempt.
        let _guard = ProcessingGuard {
            queue: self,
            id: &task.id,
        };

        self.run_attempts(task, &signal, &mut attempt).await
    }

    fn processing(&self) -> MutexGuard<'_, HashMap<String, Arc<Notify>>> {
        self.processing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> MutexGuard<'_, HashMap<String, CompletionCallback>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_attempts<F, Fut>(
        &self,
        task: &Task,
        signal: &Notify,
        attempt: &mut F,
    ) -> Option<Value>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, ExecutorError>>,
    {
        let id = task.id.as_str();

        if let Err(e) = self.registry.update(id, TaskStatus::Running, Some(0)).await {
            // Cancelled between dequeue and dispatch.
            debug!(task_id = %id, error = %e, "Skipping task that can no longer run");
            return None;
        }

        let mut last_error = ExecutorError::Failed("no attempts made".to_string());
        for n in 1..=self.max_retries {
            let result = tokio::select! {
                _ = signal.notified() => {
                    debug!(task_id = %id, attempt = n, "Task signalled during attempt");
                    return None;
                }
                result = attempt() => result,
            };

            match result {
                Ok(value) => return self.complete(id, value).await,
                Err(ExecutorError::Cancelled) => {
                    debug!(task_id = %id, "Execution cancelled");
                    return None;
                }
                Err(e) if !e.is_retryable() => {
                    warn!(task_id = %id, error = %e, "Non-retryable executor error");
                    last_error = e;
                    break;
                }
                Err(e) => {
                    warn!(
                        task_id = %id,
                        attempt = n,
                        max_retries = self.max_retries,
                        error = %e,
                        "Task attempt failed"
                    );
                    last_error = e;
                }
            }

            if n < self.max_retries {
                let delay = self.retry_delay * n;
                tokio::select! {
                    _ = signal.notified() => {
                        debug!(task_id = %id, "Task signalled during backoff");
                        return None;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        error!(task_id = %id, error = %last_error, "Task failed");
        let reason = StatusReason::ExecutorFailure {
            message: last_error.to_string(),
        };
        if let Err(e) = self
            .registry
            .update_with_reason(id, TaskStatus::Failed, reason)
            .await
        {
            debug!(task_id = %id, error = %e, "Failure not recorded");
        }
        None
    }

    async fn complete(&self, id: &str, value: Value) -> Option<Value> {
        if let Err(e) = self
            .registry
            .update(id, TaskStatus::Completed, Some(100))
            .await
        {
            // Cancelled or timed out while the last attempt was finishing.
            debug!(task_id = %id, error = %e, "Discarding late result");
            return None;
        }
        info!(task_id = %id, "Task completed");

        let callback = self.callbacks().remove(id);
        if let Some(callback) = callback {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(id, &value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task_id = %id, error = %e, "Completion callback failed"),
                Err(_) => error!(task_id = %id, "Completion callback panicked"),
            }
        }

        Some(value)
    }

    pub fn register_callback(&self, id: impl Into<String>, callback: CompletionCallback) {
        self.callbacks().insert(id.into(), callback);
    }

    pub fn remove_callback(&self, id: &str) -> bool {
        self.callbacks().remove(id).is_some()
    }

    /// Cancel a task wherever it is. Always returns true; cancelling an
    /// unknown or finished task is a no-op.
    pub async fn cancel(&self, id: &str) -> bool {
        self.cancel_with_reason(id, StatusReason::Cancelled).await
    }

    /// Cancel with an explicit reason (shutdown, pressure).
    pub async fn cancel_with_reason(&self, id: &str, reason: StatusReason) -> bool {
        let signal = self.processing().get(id).cloned();

        if signal.is_none() {
            let mut lanes = self.lanes.lock().await;
            let before = lanes.priority.len() + lanes.normal.len();
            lanes.priority.retain(|entry| entry.task.id != id);
            lanes.normal.retain(|entry| entry.task.id != id);
            if lanes.priority.len() + lanes.normal.len() < before {
                info!(task_id = %id, "Removed task from queue");
            }
        }

        self.callbacks().remove(id);
        // Record first so whoever observes the signal sees the final status.
        self.mark(id, TaskStatus::Cancelled, reason).await;

        if let Some(signal) = signal {
            signal.notify_one();
            info!(task_id = %id, "Cancelled running task");
        }
        true
    }

    /// Drain both lanes, marking every task CANCELLED with `reason`.
    /// Returns the flushed ids in dequeue order.
    pub async fn flush(&self, reason: StatusReason) -> Vec<String> {
        let drained: Vec<QueueEntry> = {
            let mut lanes = self.lanes.lock().await;
            let mut entries: Vec<QueueEntry> = lanes.priority.drain(..).collect();
            entries.extend(lanes.normal.drain(..));
            entries
        };

        let mut ids = Vec::with_capacity(drained.len());
        for entry in drained {
            self.callbacks().remove(&entry.task.id);
            self.mark(&entry.task.id, TaskStatus::Cancelled, reason.clone())
                .await;
            ids.push(entry.task.id);
        }

        if !ids.is_empty() {
            warn!(count = ids.len(), reason = %reason, "Flushed queued tasks");
        }
        ids
    }

    /// Stop a running task and record it FAILED with reason timeout.
    /// Returns whether the failure was recorded.
    pub async fn time_out(&self, id: &str) -> bool {
        match self
            .registry
            .update_with_reason(id, TaskStatus::Failed, StatusReason::Timeout)
            .await
        {
            Ok(_) => {
                warn!(task_id = %id, "Task timed out");
                if let Some(signal) = self.processing().get(id) {
                    signal.notify_one();
                }
                true
            }
            Err(e) => {
                debug!(task_id = %id, error = %e, "Timeout not recorded");
                false
            }
        }
    }

    async fn mark(&self, id: &str, status: TaskStatus, reason: StatusReason) {
        match self.registry.update_with_reason(id, status, reason).await {
            Ok(_) => {}
            Err(TaskError::NotFound { .. }) | Err(TaskError::InvalidTransition { .. }) => {
                debug!(task_id = %id, status = %status, "Task already settled");
            }
            Err(e) => warn!(task_id = %id, error = %e, "Failed to update task status"),
        }
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> QueueStatus {
        let (priority_depth, normal_depth) = {
            let lanes = self.lanes.lock().await;
            (lanes.priority.len(), lanes.normal.len())
        };

        QueueStatus {
            priority_depth,
            normal_depth,
            in_flight: self.processing().len(),
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay.as_millis() as u64,
            accepting: self.is_accepting(),
        }
    }
}

struct ProcessingGuard<'a> {
    queue: &'a TaskQueue,
    id: &'a str,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.queue.processing().remove(self.id);
        self.queue.callbacks().remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use serde_json::json;

    use super::*;
    use crate::config::RegistryConfig;

    fn queue_with(max_retries: u32, retry_delay: Duration) -> TaskQueue {
        let registry = Arc::new(TaskRegistry::new(&RegistryConfig::default()));
        TaskQueue::new(
            &QueueConfig {
                max_retries,
                retry_delay,
            },
            registry,
        )
    }

    fn queue() -> TaskQueue {
        queue_with(3, Duration::from_millis(5))
    }

    fn task(id: &str) -> Task {
        Task::new(id, "echo", json!({"n": id}))
    }

    #[tokio::test]
    async fn enqueue_registers_pending() {
        let queue = queue();
        queue.enqueue(task("t1"), false).await.unwrap();

        let record = queue.registry().get("t1").await.unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn enqueue_duplicate_leaves_no_trace() {
        let queue = queue();
        queue.enqueue(task("t1"), false).await.unwrap();
        let err = queue.enqueue(task("t1"), true).await.unwrap_err();

        assert_eq!(err, TaskError::DuplicateTask { id: "t1".into() });
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.status().await.priority_depth, 0);
    }

    #[tokio::test]
    async fn enqueue_rejects_missing_id() {
        let queue = queue();
        let err = queue.enqueue(task(""), false).await.unwrap_err();
        assert!(matches!(err, TaskError::MalformedTask { .. }));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn enqueue_rejected_while_suspended() {
        let queue = queue();
        queue.set_accepting(false);
        let err = queue.enqueue(task("t1"), false).await.unwrap_err();
        assert_eq!(err, TaskError::AdmissionsSuspended);
        assert!(queue.registry().get("t1").await.is_none());

        queue.set_accepting(true);
        assert!(queue.enqueue(task("t1"), false).await.is_ok());
    }

    #[tokio::test]
    async fn priority_lane_always_first() {
        let queue = queue();
        queue.enqueue(task("n1"), false).await.unwrap();
        queue.enqueue(task("n2"), false).await.unwrap();
        queue.enqueue(task("p1"), true).await.unwrap();
        queue.enqueue(task("n3"), false).await.unwrap();
        queue
            .enqueue(task("p2").with_priority(true), false)
            .await
            .unwrap();

        let mut order = Vec::new();
        while let Some(task) = queue.dequeue().await {
            order.push(task.id);
        }
        assert_eq!(order, vec!["p1", "p2", "n1", "n2", "n3"]);
    }

    #[tokio::test]
    async fn continuous_priority_traffic_starves_normal_lane() {
        let queue = queue();
        queue.enqueue(task("normal"), false).await.unwrap();

        for i in 0..20 {
            queue.enqueue(task(&format!("p{i}")), true).await.unwrap();
            let next = queue.dequeue().await.unwrap();
            assert_eq!(next.id, format!("p{i}"));
        }
        assert_eq!(queue.dequeue().await.unwrap().id, "normal");
    }

    #[tokio::test]
    async fn dequeue_empty_returns_none() {
        assert!(queue().dequeue().await.is_none());
    }

    #[tokio::test]
    async fn exhausted_retries_end_failed() {
        let queue = queue();
        queue.enqueue(task("t1"), false).await.unwrap();
        let task = queue.dequeue().await.unwrap();

        let calls = AtomicU32::new(0);
        let result = queue
            .process_with_retry(&task, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ExecutorError::Failed("boom".into())) }
            })
            .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let record = queue.registry().get("t1").await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(matches!(
            record.reason,
            Some(StatusReason::ExecutorFailure { .. })
        ));
        assert_eq!(queue.status().await.in_flight, 0);
    }

    #[tokio::test]
    async fn success_on_second_attempt_stops_retrying() {
        let queue = queue();
        queue.enqueue(task("t1"), false).await.unwrap();
        let task = queue.dequeue().await.unwrap();

        let calls = AtomicU32::new(0);
        let result = queue
            .process_with_retry(&task, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 2 {
                        Err(ExecutorError::Failed("flaky".into()))
                    } else {
                        Ok(json!({"attempt": n}))
                    }
                }
            })
            .await;

        assert_eq!(result, Some(json!({"attempt": 2})));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let record = queue.registry().get("t1").await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.progress, 100);
    }

    #[tokio::test]
    async fn backoff_grows_linearly() {
        let queue = queue_with(3, Duration::from_millis(40));
        queue.enqueue(task("t1"), false).await.unwrap();
        let task = queue.dequeue().await.unwrap();

        let started = tokio::time::Instant::now();
        queue
            .process_with_retry(&task, || async { Err(ExecutorError::Failed("x".into())) })
            .await;

        // 40ms after attempt 1, 80ms after attempt 2, none after the last.
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let queue = queue();
        queue.enqueue(task("t1"), false).await.unwrap();
        let task = queue.dequeue().await.unwrap();

        let calls = AtomicU32::new(0);
        queue
            .process_with_retry(&task, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ExecutorError::UnknownType("pdf".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            queue.registry().get("t1").await.unwrap().status,
            TaskStatus::Failed
        );
    }

    #[tokio::test]
    async fn callback_invoked_on_success() {
        let queue = queue();
        queue.enqueue(task("t1"), false).await.unwrap();

        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        queue
            .register_callback(
                "t1",
                Arc::new(move |id: &str, value: &Value| -> anyhow::Result<()> {
                    assert_eq!(id, "t1");
                    assert_eq!(value["ok"], true);
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );

        let task = queue.dequeue().await.unwrap();
        queue
            .process_with_retry(&task, || async { Ok(json!({"ok": true})) })
            .await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callback_errors_and_panics_are_swallowed() {
        let queue = queue();
        queue.enqueue(task("t1"), false).await.unwrap();
        queue.enqueue(task("t2"), false).await.unwrap();
        queue
            .register_callback("t1", Arc::new(|_: &str, _: &Value| -> anyhow::Result<()> {
                anyhow::bail!("sink down")
            }));
        queue
            .register_callback("t2", Arc::new(|_: &str, _: &Value| -> anyhow::Result<()> {
                panic!("callback bug")
            }));

        for _ in 0..2 {
            let task = queue.dequeue().await.unwrap();
            let result = queue
                .process_with_retry(&task, || async { Ok(json!(1)) })
                .await;
            assert_eq!(result, Some(json!(1)));
        }

        for id in ["t1", "t2"] {
            assert_eq!(
                queue.registry().get(id).await.unwrap().status,
                TaskStatus::Completed
            );
        }
    }

    #[tokio::test]
    async fn removed_callback_not_invoked() {
        let queue = queue();
        queue.enqueue(task("t1"), false).await.unwrap();
        queue
            .register_callback("t1", Arc::new(|_: &str, _: &Value| -> anyhow::Result<()> {
                panic!("should not run")
            }));
        assert!(queue.remove_callback("t1"));

        let task = queue.dequeue().await.unwrap();
        assert!(queue
            .process_with_retry(&task, || async { Ok(json!(1)) })
            .await
            .is_some());
    }

    #[tokio::test]
    async fn cancel_queued_task_is_never_dispatched() {
        let queue = queue();
        queue.enqueue(task("a"), false).await.unwrap();
        queue.enqueue(task("b"), false).await.unwrap();
        queue.enqueue(task("c"), false).await.unwrap();

        assert!(queue.cancel("b").await);

        let mut dispatched = Vec::new();
        while let Some(task) = queue.dequeue().await {
            dispatched.push(task.id);
        }
        assert_eq!(dispatched, vec!["a", "c"]);

        let record = queue.registry().get("b").await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.reason, Some(StatusReason::Cancelled));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let queue = queue();
        assert!(queue.cancel("ghost").await);

        queue.enqueue(task("t1"), false).await.unwrap();
        assert!(queue.cancel("t1").await);
        assert!(queue.cancel("t1").await);
        assert_eq!(
            queue.registry().get("t1").await.unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn cancel_after_dequeue_prevents_run() {
        let queue = queue();
        queue.enqueue(task("t1"), false).await.unwrap();
        let task = queue.dequeue().await.unwrap();
        queue.cancel("t1").await;

        let calls = AtomicU32::new(0);
        let result = queue
            .process_with_retry(&task, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(json!(1)) }
            })
            .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_running_task_interrupts_attempt() {
        let queue = Arc::new(queue());
        queue.enqueue(task("t1"), false).await.unwrap();
        let task = queue.dequeue().await.unwrap();

        let runner = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            runner
                .process_with_retry(&task, || async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(json!("late"))
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.status().await.in_flight, 1);
        queue.cancel("t1").await;

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
        let record = queue.registry().get("t1").await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.failed_at.is_some());
    }

    #[tokio::test]
    async fn flush_cancels_with_reason() {
        let queue = queue();
        queue.enqueue(task("n1"), false).await.unwrap();
        queue.enqueue(task("p1"), true).await.unwrap();

        let flushed = queue.flush(StatusReason::ResourcePressure).await;
        assert_eq!(flushed, vec!["p1", "n1"]);
        assert!(queue.is_empty().await);

        for id in flushed {
            let record = queue.registry().get(&id).await.unwrap();
            assert_eq!(record.status, TaskStatus::Cancelled);
            assert_eq!(record.reason, Some(StatusReason::ResourcePressure));
        }
    }

    #[tokio::test]
    async fn time_out_records_failed_even_if_executor_would_succeed() {
        let queue = Arc::new(queue());
        queue.enqueue(task("t1"), false).await.unwrap();
        let task = queue.dequeue().await.unwrap();

        let runner = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            runner
                .process_with_retry(&task, || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!("eventually"))
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(queue.time_out("t1").await);
        assert!(handle.await.unwrap().is_none());

        let record = queue.registry().get("t1").await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.reason, Some(StatusReason::Timeout));
    }

    #[tokio::test]
    async fn status_reports_depths() {
        let queue = queue();
        queue.enqueue(task("a"), true).await.unwrap();
        queue.enqueue(task("b"), false).await.unwrap();
        queue.enqueue(task("c"), false).await.unwrap();

        let status = queue.status().await;
        assert_eq!(status.priority_depth, 1);
        assert_eq!(status.normal_depth, 2);
        assert_eq!(status.max_retries, 3);
        assert!(status.accepting);
    }
}
