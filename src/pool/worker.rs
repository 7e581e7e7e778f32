//! Worker and collector loops.
//!
//! A worker owns one inbound channel and one outbound channel. Each job runs
//! in its own spawned task so a panicking executor only takes down that task,
//! and the pool can abort it.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinError;
use tracing::{debug, error, info};

use super::PoolState;
use crate::error::ExecutorError;
use crate::executor::Executor;
use crate::task::Task;

/// A task paired with the executor that runs it.
pub(crate) struct Job {
    pub task: Task,
    pub executor: Arc<dyn Executor>,
}

pub(crate) enum WorkerMessage {
    Run(Job),
    /// Sentinel: exit the loop.
    Stop,
}

/// Outcome pushed by a worker to its collector.
pub(crate) struct JobResult {
    pub worker: usize,
    pub task_id: String,
    pub result: Result<Value, ExecutorError>,
}

pub(crate) async fn run_worker(
    index: usize,
    mut inbound: mpsc::UnboundedReceiver<WorkerMessage>,
    outbound: mpsc::UnboundedSender<JobResult>,
    state: Arc<Mutex<PoolState>>,
) {
    debug!(worker = index, "Worker started");

    while let Some(message) = inbound.recv().await {
        let Job { task, executor } = match message {
            WorkerMessage::Run(job) => job,
            WorkerMessage::Stop => break,
        };
        let task_id = task.id.clone();

        // Check for an early cancel and publish the abort handle under one
        // lock so `WorkerPool::cancel` never misses a starting job.
        let handle = {
            let mut state = state.lock().await;
            if state.discarded.contains(&task_id) {
                None
            } else {
                let handle = tokio::spawn(async move { executor.execute(&task).await });
                if let Some(running) = state.running.get_mut(&task_id) {
                    running.abort = Some(handle.abort_handle());
                }
                Some(handle)
            }
        };

        let result = match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => join_error(&task_id, e),
            },
            None => Err(ExecutorError::Cancelled),
        };

        let sent = outbound.send(JobResult {
            worker: index,
            task_id,
            result,
        });
        if sent.is_err() {
            break;
        }
    }

    debug!(worker = index, "Worker stopped");
}

/// Drain a worker's outbound channel into the shared results map.
pub(crate) async fn run_collector(
    mut outbound: mpsc::UnboundedReceiver<JobResult>,
    state: Arc<Mutex<PoolState>>,
) {
    while let Some(JobResult {
        worker,
        task_id,
        result,
    }) = outbound.recv().await
    {
        let mut state = state.lock().await;
        if let Some(slot) = state.slots.get_mut(worker) {
            slot.busy = false;
        }
        state.running.remove(&task_id);

        if state.discarded.remove(&task_id) {
            debug!(task_id = %task_id, worker, "Discarded result of cancelled job");
            continue;
        }
        if let Err(e) = &result {
            debug!(task_id = %task_id, worker, error = %e, "Job finished with error");
        }
        state.results.insert(task_id, result);
    }
}

fn join_error(task_id: &str, err: JoinError) -> Result<Value, ExecutorError> {
    if err.is_cancelled() {
        info!(task_id = %task_id, "Job aborted");
        return Err(ExecutorError::Cancelled);
    }

    let message = match err.try_into_panic() {
        Ok(payload) => panic_message(payload),
        Err(e) => e.to_string(),
    };
    error!(task_id = %task_id, panic = %message, "Executor panicked");
    Err(ExecutorError::Panicked(message))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
