//! Error types for the task node.

use std::time::Duration;

use crate::task::TaskStatus;

/// Top-level error type for the node.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Resource probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Task source error: {0}")]
    Source(#[from] SourceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Registry and queue errors for a single task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Malformed task: {reason}")]
    MalformedTask { reason: String },

    #[error("Task {id} already exists")]
    DuplicateTask { id: String },

    #[error("Task {id} not found")]
    NotFound { id: String },

    #[error("Task {id} is {from}, cannot transition to {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Admissions are suspended while resource pressure drains")]
    AdmissionsSuspended,
}

/// Admission errors returned synchronously from `Scheduler::schedule_task`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Malformed task: {reason}")]
    MalformedTask { reason: String },

    #[error("Task {id} already exists")]
    DuplicateTask { id: String },

    #[error("No executor registered for task type {task_type}")]
    UnknownTaskType { task_type: String },

    #[error("Insufficient resources to admit task")]
    InsufficientResources,

    #[error("Admissions suspended under resource pressure")]
    ResourcePressure,

    #[error("Scheduler is not running")]
    NotRunning,
}

impl From<TaskError> for SchedulerError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::MalformedTask { reason } => Self::MalformedTask { reason },
            TaskError::DuplicateTask { id } => Self::DuplicateTask { id },
            TaskError::AdmissionsSuspended => Self::ResourcePressure,
            // Admission only creates records, and creation fails only on a
            // duplicate id. These stay mapped so the conversion is total.
            e @ (TaskError::NotFound { .. } | TaskError::InvalidTransition { .. }) => {
                Self::MalformedTask {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Worker pool lifecycle errors. These are fatal for the node.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Worker pool already started")]
    AlreadyStarted,

    #[error("Worker pool has been stopped")]
    Stopped,

    #[error("Worker pool configured with zero workers")]
    NoWorkers,
}

/// Errors produced while executing a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("Execution failed: {0}")]
    Failed(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Executor panicked: {0}")]
    Panicked(String),

    #[error("No executor for task type {0}")]
    UnknownType(String),

    #[error("Worker pool stopped before the task could run")]
    PoolStopped,
}

impl ExecutorError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Panicked(_))
    }
}

/// Resource probe errors. An unavailable sample counts as pressure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("Resource sample unavailable: {0}")]
    Unavailable(String),

    #[error("Resource probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Task source errors (pool client side).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Task source disconnected: {0}")]
    Disconnected(String),

    #[error("Invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the node.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ExecutorError::Failed("boom".into()).is_retryable());
        assert!(ExecutorError::Panicked("oops".into()).is_retryable());
        assert!(!ExecutorError::Cancelled.is_retryable());
        assert!(!ExecutorError::UnknownType("pdf".into()).is_retryable());
        assert!(!ExecutorError::PoolStopped.is_retryable());
    }

    #[test]
    fn task_error_maps_to_admission_error() {
        let err: SchedulerError = TaskError::DuplicateTask { id: "t1".into() }.into();
        assert_eq!(err, SchedulerError::DuplicateTask { id: "t1".into() });

        let err: SchedulerError = TaskError::AdmissionsSuspended.into();
        assert_eq!(err, SchedulerError::ResourcePressure);
    }

    #[test]
    fn invalid_transition_message() {
        let err = TaskError::InvalidTransition {
            id: "t1".into(),
            from: TaskStatus::Completed,
            to: TaskStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Task t1 is completed, cannot transition to running"
        );
    }

    #[test]
    fn task_errors_map_to_admission_errors() {
        assert_eq!(
            SchedulerError::from(TaskError::DuplicateTask { id: "t1".into() }),
            SchedulerError::DuplicateTask { id: "t1".into() }
        );
        assert_eq!(
            SchedulerError::from(TaskError::AdmissionsSuspended),
            SchedulerError::ResourcePressure
        );
        assert!(matches!(
            SchedulerError::from(TaskError::NotFound { id: "t1".into() }),
            SchedulerError::MalformedTask { reason } if reason.contains("t1")
        ));
    }
}
