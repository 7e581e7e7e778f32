//! Task executors and the registry that maps task types to them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::error::ExecutorError;
use crate::task::Task;

/// Upper bound for the built-in `sleep` executor.
const MAX_SLEEP: Duration = Duration::from_secs(600);

/// Something that can run a task of a given type.
///
/// Executors run inside a worker's job task. They must not touch scheduler
/// state; everything they need is in `task.config`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Task type tag this executor handles.
    fn task_type(&self) -> &str;

    /// Run the task and return its result payload.
    async fn execute(&self, task: &Task) -> Result<Value, ExecutorError>;
}

/// Registry of executors keyed by task type.
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn Executor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with `echo` and `sleep`.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_sync(Arc::new(EchoExecutor));
        registry.register_sync(Arc::new(SleepExecutor));
        registry
    }

    /// Register an executor, replacing any previous one for the same type.
    pub async fn register(&self, executor: Arc<dyn Executor>) {
        let task_type = executor.task_type().to_string();
        let replaced = self
            .executors
            .write()
            .await
            .insert(task_type.clone(), executor)
            .is_some();
        if replaced {
            tracing::warn!(task_type = %task_type, "Replaced existing executor");
        } else {
            tracing::debug!("Registered executor: {}", task_type);
        }
    }

    /// Register an executor (sync version for startup).
    pub fn register_sync(&self, executor: Arc<dyn Executor>) {
        let task_type = executor.task_type().to_string();
        if let Ok(mut executors) = self.executors.try_write() {
            executors.insert(task_type.clone(), executor);
            tracing::debug!("Registered executor: {}", task_type);
        }
    }

    pub async fn unregister(&self, task_type: &str) -> Option<Arc<dyn Executor>> {
        self.executors.write().await.remove(task_type)
    }

    pub async fn get(&self, task_type: &str) -> Option<Arc<dyn Executor>> {
        self.executors.read().await.get(task_type).cloned()
    }

    pub async fn has(&self, task_type: &str) -> bool {
        self.executors.read().await.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.read().await.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the task config unchanged.
pub struct EchoExecutor;

#[async_trait]
impl Executor for EchoExecutor {
    fn task_type(&self) -> &str {
        "echo"
    }

    async fn execute(&self, task: &Task) -> Result<Value, ExecutorError> {
        Ok(task.config.clone())
    }
}

/// Sleeps for `config.duration_ms` milliseconds, then optionally fails
/// when `config.fail` is true. Useful for exercising timeouts and retries
/// on a live node.
pub struct SleepExecutor;

#[async_trait]
impl Executor for SleepExecutor {
    fn task_type(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, task: &Task) -> Result<Value, ExecutorError> {
        let millis = task
            .config
            .get("duration_ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| ExecutorError::Failed("missing 'duration_ms' parameter".into()))?;
        let duration = Duration::from_millis(millis).min(MAX_SLEEP);

        tokio::time::sleep(duration).await;

        if task.config.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ExecutorError::Failed(format!(
                "requested failure after {}ms",
                duration.as_millis()
            )));
        }

        Ok(json!({ "slept_ms": duration.as_millis() as u64 }))
    }
}
