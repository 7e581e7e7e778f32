//! Task status registry. Authoritative record of every task seen.
//!
//! Active and history maps live behind one lock so a record is always
//! visible in exactly one of them, including mid-migration.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::TaskError;
use crate::task::{StatusReason, TaskRecord, TaskStatus};

#[derive(Debug, Default)]
struct Maps {
    active: HashMap<String, TaskRecord>,
    history: HashMap<String, TaskRecord>,
    /// History ids, oldest first.
    history_order: VecDeque<String>,
}

impl Maps {
    fn contains(&self, id: &str) -> bool {
        self.active.contains_key(id) || self.history.contains_key(id)
    }

    fn push_history(&mut self, record: TaskRecord, max_history: usize) {
        self.history_order.push_back(record.id.clone());
        self.history.insert(record.id.clone(), record);

        while self.history.len() > max_history {
            match self.history_order.pop_front() {
                Some(oldest) => {
                    self.history.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

/// Registry of task records.
pub struct TaskRegistry {
    maps: RwLock<Maps>,
    max_history: usize,
}

impl TaskRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
            max_history: config.max_history.max(1),
        }
    }

    /// Create a PENDING record. Ids must be unique across active and history.
    pub async fn create(
        &self,
        id: impl Into<String>,
        task_type: impl Into<String>,
    ) -> Result<TaskRecord, TaskError> {
        let id = id.into();
        let mut maps = self.maps.write().await;
        if maps.contains(&id) {
            return Err(TaskError::DuplicateTask { id });
        }

        let record = TaskRecord::new(id.clone(), task_type);
        maps.active.insert(id, record.clone());
        Ok(record)
    }

    /// Transition a task's status, optionally overwriting progress.
    pub async fn update(
        &self,
        id: &str,
        status: TaskStatus,
        progress: Option<u8>,
    ) -> Result<TaskRecord, TaskError> {
        self.apply(id, status, progress, None).await
    }

    /// Transition a task's status and record why.
    pub async fn update_with_reason(
        &self,
        id: &str,
        status: TaskStatus,
        reason: StatusReason,
    ) -> Result<TaskRecord, TaskError> {
        self.apply(id, status, None, Some(reason)).await
    }

    async fn apply(
        &self,
        id: &str,
        status: TaskStatus,
        progress: Option<u8>,
        reason: Option<StatusReason>,
    ) -> Result<TaskRecord, TaskError> {
        let mut maps = self.maps.write().await;

        let Some(record) = maps.active.get_mut(id) else {
            return Err(match maps.history.get(id) {
                Some(done) => TaskError::InvalidTransition {
                    id: id.to_string(),
                    from: done.status,
                    to: status,
                },
                None => TaskError::NotFound { id: id.to_string() },
            });
        };

        if let Err(e) = record.transition_to(status, progress, reason) {
            warn!(task_id = %id, error = %e, "Rejected status transition");
            return Err(e);
        }
        let snapshot = record.clone();

        if status.is_terminal() {
            if let Some(done) = maps.active.remove(id) {
                maps.push_history(done, self.max_history);
            }
            debug!(task_id = %id, status = %status, "Task moved to history");
        }

        Ok(snapshot)
    }

    /// Report progress for an active task without changing its status.
    pub async fn set_progress(&self, id: &str, progress: u8) -> Result<TaskRecord, TaskError> {
        let mut maps = self.maps.write().await;
        let record = maps
            .active
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() })?;
        record.progress = progress.min(100);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    /// Look up a record, active first.
    pub async fn get(&self, id: &str) -> Option<TaskRecord> {
        let maps = self.maps.read().await;
        maps.active
            .get(id)
            .or_else(|| maps.history.get(id))
            .cloned()
    }

    /// Snapshot of active records, oldest first.
    pub async fn list_active(&self) -> Vec<TaskRecord> {
        let maps = self.maps.read().await;
        let mut records: Vec<TaskRecord> = maps.active.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Snapshot of history, most recent first.
    pub async fn list_history(&self, limit: Option<usize>) -> Vec<TaskRecord> {
        let maps = self.maps.read().await;
        maps.history_order
            .iter()
            .rev()
            .filter_map(|id| maps.history.get(id))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Drop history entries last updated more than `max_age` ago.
    /// Returns the number of entries removed.
    pub async fn prune_history(&self, max_age: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(max_age) {
            Ok(age) => Utc::now() - age,
            Err(_) => return 0,
        };

        let mut maps = self.maps.write().await;
        let before = maps.history.len();
        maps.history.retain(|_, record| record.updated_at >= cutoff);
        let Maps {
            history,
            history_order,
            ..
        } = &mut *maps;
        history_order.retain(|id| history.contains_key(id));

        let removed = before - maps.history.len();
        if removed > 0 {
            debug!(count = removed, "Pruned task history");
        }
        removed
    }

    pub async fn active_count(&self) -> usize {
        self.maps.read().await.active.len()
    }

    pub async fn history_len(&self) -> usize {
        self.maps.read().await.history.len()
    }

    /// Count records per status across active tasks and history.
    pub async fn summary(&self) -> RegistrySummary {
        let maps = self.maps.read().await;

        let mut summary = RegistrySummary::default();
        for record in maps.active.values().chain(maps.history.values()) {
            match record.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }

        summary.total = maps.active.len() + maps.history.len();
        summary
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}

/// Per-status record counts.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RegistrySummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}
