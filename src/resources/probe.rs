//! Resource probes: where samples come from.

use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

const KIB_PER_GIB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Point-in-time snapshot of node resources. Sizes are in GB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub memory_available_gb: f64,
    pub memory_total_gb: f64,
    pub gpu_available: bool,
    pub gpu_memory_free_gb: f64,
    pub gpu_memory_total_gb: f64,
    pub disk_free_gb: f64,
    pub disk_total_gb: f64,
    pub cpu_percent: f64,
}

impl ResourceSample {
    /// Fraction of memory in use, if the total is known.
    pub fn memory_usage(&self) -> Option<f64> {
        used_fraction(self.memory_available_gb, self.memory_total_gb)
    }

    /// Fraction of GPU memory in use. `None` without a GPU.
    pub fn gpu_memory_usage(&self) -> Option<f64> {
        if !self.gpu_available {
            return None;
        }
        used_fraction(self.gpu_memory_free_gb, self.gpu_memory_total_gb)
    }

    pub fn disk_usage(&self) -> Option<f64> {
        used_fraction(self.disk_free_gb, self.disk_total_gb)
    }
}

fn used_fraction(free: f64, total: f64) -> Option<f64> {
    if total > 0.0 {
        Some((1.0 - free / total).clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Source of resource samples (system counters, GPU driver, a test double).
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn sample(&self) -> Result<ResourceSample, ProbeError>;
}

/// Probe that returns whatever it was last told. Used in tests and for
/// nodes where sampling is driven externally.
pub struct StaticProbe {
    sample: RwLock<Result<ResourceSample, ProbeError>>,
    delay: RwLock<Duration>,
}

impl StaticProbe {
    pub fn new(sample: ResourceSample) -> Self {
        Self {
            sample: RwLock::new(Ok(sample)),
            delay: RwLock::new(Duration::ZERO),
        }
    }

    /// A sample with plenty of headroom on every resource.
    pub fn healthy() -> Self {
        Self::new(ResourceSample {
            memory_available_gb: 12.0,
            memory_total_gb: 16.0,
            gpu_available: false,
            gpu_memory_free_gb: 0.0,
            gpu_memory_total_gb: 0.0,
            disk_free_gb: 400.0,
            disk_total_gb: 500.0,
            cpu_percent: 10.0,
        })
    }

    pub fn set(&self, sample: ResourceSample) {
        *self.sample.write().unwrap_or_else(|e| e.into_inner()) = Ok(sample);
    }

    /// Make subsequent samples fail.
    pub fn fail(&self, err: ProbeError) {
        *self.sample.write().unwrap_or_else(|e| e.into_inner()) = Err(err);
    }

    /// Delay every answer, to simulate a hung driver.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Convenience for adjusting one field of the current sample.
    pub fn update<F: FnOnce(&mut ResourceSample)>(&self, f: F) {
        let mut guard = self.sample.write().unwrap_or_else(|e| e.into_inner());
        let mut sample = guard.as_ref().cloned().unwrap_or_default();
        f(&mut sample);
        *guard = Ok(sample);
    }
}

#[async_trait]
impl ResourceProbe for StaticProbe {
    async fn sample(&self) -> Result<ResourceSample, ProbeError> {
        let delay = *self.delay.read().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.sample
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Linux probe backed by `/proc/meminfo`, `/proc/loadavg` and the
/// filesystem holding `disk_path`.
///
/// Reports no GPU. Pair with a driver-specific probe for GPU nodes.
pub struct ProcProbe {
    root: PathBuf,
    disk_path: PathBuf,
}

impl ProcProbe {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Read from an alternate proc root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            disk_path: PathBuf::from("/"),
        }
    }

    /// Sample disk usage for the filesystem holding `path`.
    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = path.into();
        self
    }

    /// Returns `(free_gb, total_gb)`. Free space is what an unprivileged
    /// writer can still use.
    async fn disk_space(&self) -> Result<(f64, f64), ProbeError> {
        let path = self.disk_path.clone();
        let (free, total) = tokio::task::spawn_blocking(move || {
            Ok::<_, std::io::Error>((fs2::available_space(&path)?, fs2::total_space(&path)?))
        })
        .await
        .map_err(|e| ProbeError::Unavailable(format!("disk sampling task failed: {e}")))??;
        Ok((free as f64 / BYTES_PER_GIB, total as f64 / BYTES_PER_GIB))
    }
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProbe for ProcProbe {
    async fn sample(&self) -> Result<ResourceSample, ProbeError> {
        let meminfo = tokio::fs::read_to_string(self.root.join("meminfo")).await?;
        let (memory_total_gb, memory_available_gb) = parse_meminfo(&meminfo)?;
        let (disk_free_gb, disk_total_gb) = self.disk_space().await?;

        let cpu_percent = match tokio::fs::read_to_string(self.root.join("loadavg")).await {
            Ok(loadavg) => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                parse_loadavg(&loadavg, cpus).unwrap_or(0.0)
            }
            Err(e) => {
                tracing::debug!(error = %e, "loadavg unavailable");
                0.0
            }
        };

        Ok(ResourceSample {
            memory_available_gb,
            memory_total_gb,
            disk_free_gb,
            disk_total_gb,
            cpu_percent,
            ..ResourceSample::default()
        })
    }
}

/// Returns `(total_gb, available_gb)`.
fn parse_meminfo(contents: &str) -> Result<(f64, f64), ProbeError> {
    let mut total = None;
    let mut available = None;

    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let key = parts.next();
        let value = parts.next().and_then(|v| v.parse::<f64>().ok());
        match key {
            Some("MemTotal:") => total = value,
            Some("MemAvailable:") => available = value,
            _ => {}
        }
    }

    match (total, available) {
        (Some(total), Some(available)) => Ok((total / KIB_PER_GIB, available / KIB_PER_GIB)),
        _ => Err(ProbeError::Unavailable(
            "meminfo missing MemTotal or MemAvailable".to_string(),
        )),
    }
}

/// One-minute load average as a percentage of available CPUs.
fn parse_loadavg(contents: &str, cpus: usize) -> Option<f64> {
    let load: f64 = contents.split_whitespace().next()?.parse().ok()?;
    Some((load / cpus.max(1) as f64 * 100.0).min(100.0))
}
