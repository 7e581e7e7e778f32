//! Task pool collaborators: where tasks come from and where outcomes go.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SourceError};
use crate::scheduler::Scheduler;
use crate::task::{StatusReason, Task, TaskRecord, TaskStatus};

/// Default wait between polls when the source is empty or failing.
pub const INTAKE_BACKOFF: Duration = Duration::from_secs(5);

/// Final outcome of a task, as reported back to the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { result: Value },
    Failed { reason: StatusReason },
    Cancelled { reason: StatusReason },
    /// Never admitted.
    Rejected { error: String },
}

impl TaskOutcome {
    /// Build the outcome for a terminal record. `None` if the record is
    /// still active.
    pub fn from_record(record: &TaskRecord, result: Option<Value>) -> Option<Self> {
        let outcome = match record.status {
            TaskStatus::Pending | TaskStatus::Running => return None,
            TaskStatus::Completed => Self::Completed {
                result: result.unwrap_or(Value::Null),
            },
            TaskStatus::Failed => Self::Failed {
                reason: record.reason.clone().unwrap_or(StatusReason::ExecutorFailure {
                    message: "unknown".to_string(),
                }),
            },
            TaskStatus::Cancelled => Self::Cancelled {
                reason: record.reason.clone().unwrap_or(StatusReason::Cancelled),
            },
        };
        Some(outcome)
    }
}

/// Pulls tasks from the remote pool.
///
/// `Ok(None)` means nothing is available right now. `SourceError::Disconnected`
/// ends the intake loop.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn next_task(&self) -> Result<Option<Task>, SourceError>;
}

/// Receives task outcomes.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn submit_result(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), SourceError>;
}

/// Sink that only logs outcomes.
pub struct LogResultSink;

#[async_trait]
impl ResultSink for LogResultSink {
    async fn submit_result(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), SourceError> {
        info!(task_id = %task_id, outcome = ?outcome, "Task outcome");
        Ok(())
    }
}

/// Sink that forwards outcomes over a channel.
pub struct ChannelResultSink {
    tx: mpsc::UnboundedSender<(String, TaskOutcome)>,
}

impl ChannelResultSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, TaskOutcome)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ResultSink for ChannelResultSink {
    async fn submit_result(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), SourceError> {
        self.tx
            .send((task_id.to_string(), outcome))
            .map_err(|_| SourceError::Disconnected("result receiver dropped".to_string()))
    }
}

/// Source fed from a channel. Disconnects once every sender is dropped and
/// the buffer is drained.
pub struct ChannelTaskSource {
    rx: Mutex<mpsc::Receiver<Task>>,
}

impl ChannelTaskSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<Task>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx: Mutex::new(rx) })
    }
}

#[async_trait]
impl TaskSource for ChannelTaskSource {
    async fn next_task(&self) -> Result<Option<Task>, SourceError> {
        let mut rx = self.rx.lock().await;
        match rx.try_recv() {
            Ok(task) => Ok(Some(task)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SourceError::Disconnected(
                "task channel closed".to_string(),
            )),
        }
    }
}

/// Spawn the intake loop: pull from `source`, hand to the scheduler.
///
/// Sleeps `backoff` when the source is empty or errors. Rejected tasks are
/// reported to `sink` as [`TaskOutcome::Rejected`]. Exits when the source
/// disconnects or the scheduler stops.
pub fn spawn_intake_loop(
    source: Arc<dyn TaskSource>,
    scheduler: Arc<Scheduler>,
    sink: Arc<dyn ResultSink>,
    backoff: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Task intake loop started (backoff: {}ms)", backoff.as_millis());

        while scheduler.is_running() {
            let task = match source.next_task().await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(SourceError::Disconnected(reason)) => {
                    info!(reason = %reason, "Task source disconnected, intake stopping");
                    break;
                }
                Err(SourceError::InvalidPayload(reason)) => {
                    warn!(reason = %reason, "Skipping malformed task payload");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to fetch task");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            intake_one(&scheduler, &sink, task).await;
        }

        debug!("Task intake loop exited");
    })
}

async fn intake_one(scheduler: &Arc<Scheduler>, sink: &Arc<dyn ResultSink>, task: Task) {
    let id = task.id.clone();
    let priority = task.priority;

    match scheduler.schedule_task(task, priority).await {
        Ok(()) => {}
        Err(e) => {
            match &e {
                SchedulerError::InsufficientResources | SchedulerError::ResourcePressure => {
                    warn!(task_id = %id, error = %e, "Task refused under resource pressure")
                }
                _ => warn!(task_id = %id, error = %e, "Task rejected"),
            }
            let outcome = TaskOutcome::Rejected {
                error: e.to_string(),
            };
            if let Err(e) = sink.submit_result(&id, outcome).await {
                warn!(task_id = %id, error = %e, "Failed to report rejected task");
            }
        }
    }
}
