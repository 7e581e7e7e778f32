//! Task description and the task status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// A unit of work pulled from the task pool.
///
/// Immutable once submitted. `config` is an opaque payload handed to the
/// executor selected by `task_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub task_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub priority: bool,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            config,
            priority: false,
        }
    }

    /// Mark the task for the priority lane.
    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// Check that `id`, `type` and `config` are all present.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.id.trim().is_empty() {
            return Err(TaskError::MalformedTask {
                reason: "missing id".to_string(),
            });
        }
        if self.task_type.trim().is_empty() {
            return Err(TaskError::MalformedTask {
                reason: format!("task {} missing type", self.id),
            });
        }
        if self.config.is_null() {
            return Err(TaskError::MalformedTask {
                reason: format!("task {} missing config", self.id),
            });
        }
        Ok(())
    }
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted and waiting in a lane.
    Pending,
    /// Dispatched to a worker.
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Pending, Cancelled) |
            (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Why a task ended in a non-success terminal state.
///
/// Pressure flushes and explicit cancels both end in `Cancelled`; the reason
/// tells callers which one happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusReason {
    /// Cancelled on request.
    Cancelled,
    /// Flushed from the queue while the node drained under resource pressure.
    ResourcePressure,
    /// Exceeded the task timeout and was forcibly cancelled.
    Timeout,
    /// Executor kept failing until retries ran out.
    ExecutorFailure { message: String },
    /// Still tracked when the scheduler stopped.
    Shutdown,
}

impl std::fmt::Display for StatusReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::ResourcePressure => write!(f, "resource pressure"),
            Self::Timeout => write!(f, "timeout"),
            Self::ExecutorFailure { message } => write!(f, "executor failure: {message}"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Registry record for a task. Only `TaskRegistry` mutates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    /// Percent complete, 0-100.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StatusReason>,
}

impl TaskRecord {
    pub(crate) fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_type: task_type.into(),
            status: TaskStatus::Pending,
            progress: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            reason: None,
        }
    }

    /// Apply a transition, stamping timestamps. Rejected transitions leave
    /// the record untouched.
    pub(crate) fn transition_to(
        &mut self,
        status: TaskStatus,
        progress: Option<u8>,
        reason: Option<StatusReason>,
    ) -> Result<(), TaskError> {
        if !self.status.can_transition_to(status) {
            return Err(TaskError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: status,
            });
        }

        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        if let Some(progress) = progress {
            self.progress = progress.min(100);
        }
        match status {
            TaskStatus::Completed => self.completed_at = Some(now),
            TaskStatus::Failed | TaskStatus::Cancelled => self.failed_at = Some(now),
            _ => {}
        }
        if reason.is_some() {
            self.reason = reason;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Running));
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            for target in [
                TaskStatus::Pending,
                TaskStatus::Running,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(target), "{terminal} -> {target}");
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(TaskStatus::Running.is_active());
    }

    #[test]
    fn record_transition_stamps_timestamps() {
        let mut record = TaskRecord::new("t1", "summary");
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0);

        record.transition_to(TaskStatus::Running, Some(40), None).unwrap();
        assert_eq!(record.progress, 40);
        assert!(record.completed_at.is_none());

        record.transition_to(TaskStatus::Completed, None, None).unwrap();
        assert!(record.completed_at.is_some());
        assert!(record.failed_at.is_none());
        assert_eq!(record.progress, 40);
    }

    #[test]
    fn rejected_transition_leaves_record_untouched() {
        let mut record = TaskRecord::new("t1", "summary");
        let before = record.clone();

        let err = record
            .transition_to(TaskStatus::Completed, Some(50), None)
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(record, before);
    }

    #[test]
    fn progress_is_clamped() {
        let mut record = TaskRecord::new("t1", "summary");
        record.transition_to(TaskStatus::Running, Some(250), None).unwrap();
        assert_eq!(record.progress, 100);
    }

    #[test]
    fn validate_required_fields() {
        let ok = Task::new("t1", "summary", serde_json::json!({"paper": "a.pdf"}));
        assert!(ok.validate().is_ok());

        let no_id = Task::new("", "summary", serde_json::json!({}));
        assert!(matches!(no_id.validate(), Err(TaskError::MalformedTask { .. })));

        let no_type = Task::new("t1", " ", serde_json::json!({}));
        assert!(no_type.validate().is_err());

        let no_config = Task::new("t1", "summary", serde_json::Value::Null);
        assert!(no_config.validate().is_err());
    }

    #[test]
    fn task_deserializes_with_missing_fields() {
        let task: Task = serde_json::from_str(r#"{"type": "summary"}"#).unwrap();
        assert!(task.id.is_empty());
        assert!(!task.priority);
        assert!(task.validate().is_err());

        let task: Task =
            serde_json::from_str(r#"{"id": "t9", "type": "echo", "config": {}, "priority": true}"#)
                .unwrap();
        assert_eq!(task.task_type, "echo");
        assert!(task.priority);
    }

    #[test]
    fn status_serde_and_display() {
        assert_eq!(TaskStatus::Cancelled.to_string(), "cancelled");
        let json = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");

        let reason = serde_json::to_value(StatusReason::ResourcePressure).unwrap();
        assert_eq!(reason["kind"], "resource_pressure");
    }
}
