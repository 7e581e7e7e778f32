//! Configuration types.
//!
//! Everything is passed in explicitly: `NodeConfig` is built once (usually
//! from `TASKNODE_*` environment variables) and each component receives only
//! its own section.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Full node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub scheduler: SchedulerConfig,
    pub queue: QueueConfig,
    pub pool: PoolConfig,
    pub resources: ResourceConfig,
    pub registry: RegistryConfig,
    pub http: HttpConfig,
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks dispatched at once.
    pub max_concurrent_tasks: usize,
    /// Dispatch loop sleep when no headroom or the queue is empty.
    #[serde(with = "duration_ms")]
    pub queue_poll_interval: Duration,
    /// Resource loop sampling interval. Also the probe deadline.
    #[serde(with = "duration_ms")]
    pub resource_poll_interval: Duration,
    /// Hard per-task execution budget.
    #[serde(with = "duration_ms")]
    pub task_timeout: Duration,
    /// How often the timeout sweep scans in-flight tasks.
    #[serde(with = "duration_ms")]
    pub timeout_check_interval: Duration,
    /// History entries older than this are pruned.
    #[serde(with = "duration_ms")]
    pub history_retention: Duration,
    /// How often history pruning runs.
    #[serde(with = "duration_ms")]
    pub history_prune_interval: Duration,
    /// How often a status snapshot goes to the telemetry sink.
    #[serde(with = "duration_ms")]
    pub status_report_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            queue_poll_interval: Duration::from_secs(1),
            resource_poll_interval: Duration::from_secs(30),
            task_timeout: Duration::from_secs(3600), // 1 hour
            timeout_check_interval: Duration::from_secs(60),
            history_retention: Duration::from_secs(7 * 24 * 3600), // 7 days
            history_prune_interval: Duration::from_secs(3600),
            status_report_interval: Duration::from_secs(60),
        }
    }
}

/// Task queue retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Total executor attempts before a task is marked failed.
    pub max_retries: u32,
    /// Base backoff; attempt `n` waits `retry_delay * n`.
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers. 0 = available parallelism minus one.
    pub worker_count: usize,
    /// Poll interval used by `get_result` and submit backoff.
    #[serde(with = "duration_ms")]
    pub result_poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            result_poll_interval: Duration::from_millis(100),
        }
    }
}

impl PoolConfig {
    /// Resolve the worker count, reserving one unit for the control plane.
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1).max(1))
                .unwrap_or(1)
        } else {
            self.worker_count
        }
    }
}

/// Resource thresholds and admission floors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Fraction of memory in use that counts as pressure.
    pub memory_threshold: f64,
    /// Fraction of GPU memory in use that counts as pressure.
    pub gpu_memory_threshold: f64,
    /// Fraction of disk in use that counts as pressure.
    pub disk_threshold: f64,
    /// Filesystem sampled for disk usage.
    pub disk_path: PathBuf,
    /// Fraction of CPU load that counts as pressure. Off by default: the
    /// node's own tasks load the CPU.
    pub cpu_threshold: Option<f64>,
    /// Admission floor for available memory, in GB.
    pub min_memory_available_gb: f64,
    /// Admission floor for free GPU memory, in GB (only when a GPU exists).
    pub min_gpu_memory_gb: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_threshold: 0.8,
            gpu_memory_threshold: 0.9,
            disk_threshold: 0.9,
            disk_path: PathBuf::from("/"),
            cpu_threshold: None,
            min_memory_available_gb: 2.0,
            min_gpu_memory_gb: 2.0,
        }
    }
}

/// Status registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of terminal records kept in history.
    pub max_history: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_history: 100 }
    }
}

/// HTTP status surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl NodeConfig {
    /// Build config from `TASKNODE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        let s = &mut config.scheduler;
        set_parsed(&get, "TASKNODE_MAX_CONCURRENT_TASKS", &mut s.max_concurrent_tasks)?;
        set_millis(&get, "TASKNODE_QUEUE_POLL_MS", &mut s.queue_poll_interval)?;
        set_secs(&get, "TASKNODE_RESOURCE_POLL_SECS", &mut s.resource_poll_interval)?;
        set_secs(&get, "TASKNODE_TASK_TIMEOUT_SECS", &mut s.task_timeout)?;
        set_secs(&get, "TASKNODE_TIMEOUT_CHECK_SECS", &mut s.timeout_check_interval)?;
        set_secs(&get, "TASKNODE_HISTORY_RETENTION_SECS", &mut s.history_retention)?;
        set_secs(&get, "TASKNODE_STATUS_REPORT_SECS", &mut s.status_report_interval)?;

        set_parsed(&get, "TASKNODE_MAX_RETRIES", &mut config.queue.max_retries)?;
        set_millis(&get, "TASKNODE_RETRY_DELAY_MS", &mut config.queue.retry_delay)?;

        set_parsed(&get, "TASKNODE_WORKERS", &mut config.pool.worker_count)?;

        let r = &mut config.resources;
        set_parsed(&get, "TASKNODE_MEMORY_THRESHOLD", &mut r.memory_threshold)?;
        set_parsed(&get, "TASKNODE_GPU_MEMORY_THRESHOLD", &mut r.gpu_memory_threshold)?;
        set_parsed(&get, "TASKNODE_DISK_THRESHOLD", &mut r.disk_threshold)?;
        set_parsed(&get, "TASKNODE_MIN_MEMORY_GB", &mut r.min_memory_available_gb)?;
        set_parsed(&get, "TASKNODE_MIN_GPU_MEMORY_GB", &mut r.min_gpu_memory_gb)?;
        set_parsed(&get, "TASKNODE_DISK_PATH", &mut r.disk_path)?;
        if get("TASKNODE_CPU_THRESHOLD").is_some() {
            let mut threshold = 0.0;
            set_parsed(&get, "TASKNODE_CPU_THRESHOLD", &mut threshold)?;
            r.cpu_threshold = Some(threshold);
        }

        set_parsed(&get, "TASKNODE_MAX_HISTORY", &mut config.registry.max_history)?;

        set_parsed(&get, "TASKNODE_HTTP_ENABLED", &mut config.http.enabled)?;
        set_parsed(&get, "TASKNODE_HTTP_PORT", &mut config.http.port)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_concurrent_tasks == 0 {
            return Err(invalid("max_concurrent_tasks", "must be at least 1"));
        }
        for (key, value) in [
            ("queue_poll_interval", self.scheduler.queue_poll_interval),
            ("resource_poll_interval", self.scheduler.resource_poll_interval),
            ("task_timeout", self.scheduler.task_timeout),
            ("timeout_check_interval", self.scheduler.timeout_check_interval),
            ("history_prune_interval", self.scheduler.history_prune_interval),
            ("status_report_interval", self.scheduler.status_report_interval),
            ("result_poll_interval", self.pool.result_poll_interval),
        ] {
            if value.is_zero() {
                return Err(invalid(key, "must be greater than zero"));
            }
        }
        if self.queue.max_retries == 0 {
            return Err(invalid("max_retries", "must be at least 1"));
        }
        let thresholds = [
            ("memory_threshold", Some(self.resources.memory_threshold)),
            ("gpu_memory_threshold", Some(self.resources.gpu_memory_threshold)),
            ("disk_threshold", Some(self.resources.disk_threshold)),
            ("cpu_threshold", self.resources.cpu_threshold),
        ];
        for (key, value) in thresholds {
            let Some(value) = value else { continue };
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(key, "must be a fraction in (0, 1]"));
            }
        }
        if self.resources.min_memory_available_gb < 0.0 || self.resources.min_gpu_memory_gb < 0.0 {
            return Err(invalid("min_memory_available_gb", "floors cannot be negative"));
        }
        if self.registry.max_history == 0 {
            return Err(invalid("max_history", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn set_parsed<T, G>(get: &G, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *slot = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        })?;
    }
    Ok(())
}

fn set_secs<G>(get: &G, key: &str, slot: &mut Duration) -> Result<(), ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let mut secs = slot.as_secs();
    set_parsed(get, key, &mut secs)?;
    *slot = Duration::from_secs(secs);
    Ok(())
}

fn set_millis<G>(get: &G, key: &str, slot: &mut Duration) -> Result<(), ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let mut millis = slot.as_millis() as u64;
    set_parsed(get, key, &mut millis)?;
    *slot = Duration::from_millis(millis);
    Ok(())
}

/// Serialize durations as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
