//! Resource health evaluation and the admission floor.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::probe::{ResourceProbe, ResourceSample};
use crate::config::ResourceConfig;
use crate::error::ProbeError;

/// One reason a sample counts as pressure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum Violation {
    Memory { usage: f64, threshold: f64 },
    GpuMemory { usage: f64, threshold: f64 },
    Disk { usage: f64, threshold: f64 },
    Cpu { usage: f64, threshold: f64 },
    /// Available memory under the absolute floor.
    MemoryFloor { available_gb: f64, floor_gb: f64 },
    GpuMemoryFloor { free_gb: f64, floor_gb: f64 },
    /// No usable sample; treated as pressure.
    ProbeUnavailable { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceHealth {
    pub healthy: bool,
    pub violations: Vec<Violation>,
}

impl ResourceHealth {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            healthy: violations.is_empty(),
            violations,
        }
    }
}

/// Samples a probe and applies thresholds.
pub struct ResourceMonitor {
    probe: Arc<dyn ResourceProbe>,
    config: ResourceConfig,
    /// A probe slower than this counts as pressure.
    probe_timeout: Duration,
}

impl ResourceMonitor {
    pub fn new(probe: Arc<dyn ResourceProbe>, config: ResourceConfig, probe_timeout: Duration) -> Self {
        Self {
            probe,
            config,
            probe_timeout,
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Take one sample, bounded by the probe timeout.
    pub async fn sample(&self) -> Result<ResourceSample, ProbeError> {
        match tokio::time::timeout(self.probe_timeout, self.probe.sample()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.probe_timeout)),
        }
    }

    /// Admission check: enough free memory (and GPU memory, when a GPU is
    /// present) to start another task. Any probe failure refuses admission.
    pub async fn check_resources(&self) -> bool {
        match self.sample().await {
            Ok(sample) => self.floor_violations(&sample).is_empty(),
            Err(e) => {
                warn!(error = %e, "Resource check failed, refusing admission");
                false
            }
        }
    }

    /// Sample and evaluate. Probe errors and timeouts come back unhealthy.
    pub async fn poll(&self) -> ResourceHealth {
        match self.sample().await {
            Ok(sample) => self.evaluate(&sample),
            Err(e) => ResourceHealth::from_violations(vec![Violation::ProbeUnavailable {
                message: e.to_string(),
            }]),
        }
    }

    /// Compare a sample against every threshold and floor.
    pub fn evaluate(&self, sample: &ResourceSample) -> ResourceHealth {
        let mut violations = Vec::new();

        if let Some(usage) = sample.memory_usage()
            && usage > self.config.memory_threshold
        {
            violations.push(Violation::Memory {
                usage,
                threshold: self.config.memory_threshold,
            });
        }
        if let Some(usage) = sample.gpu_memory_usage()
            && usage > self.config.gpu_memory_threshold
        {
            violations.push(Violation::GpuMemory {
                usage,
                threshold: self.config.gpu_memory_threshold,
            });
        }
        if let Some(usage) = sample.disk_usage()
            && usage > self.config.disk_threshold
        {
            violations.push(Violation::Disk {
                usage,
                threshold: self.config.disk_threshold,
            });
        }
        if let Some(threshold) = self.config.cpu_threshold {
            let usage = sample.cpu_percent / 100.0;
            if usage > threshold {
                violations.push(Violation::Cpu { usage, threshold });
            }
        }
        violations.extend(self.floor_violations(sample));

        if !violations.is_empty() {
            debug!(?violations, "Resource thresholds exceeded");
        }
        ResourceHealth::from_violations(violations)
    }

    fn floor_violations(&self, sample: &ResourceSample) -> Vec<Violation> {
        let mut violations = Vec::new();
        if sample.memory_available_gb < self.config.min_memory_available_gb {
            violations.push(Violation::MemoryFloor {
                available_gb: sample.memory_available_gb,
                floor_gb: self.config.min_memory_available_gb,
            });
        }
        if sample.gpu_available && sample.gpu_memory_free_gb < self.config.min_gpu_memory_gb {
            violations.push(Violation::GpuMemoryFloor {
                free_gb: sample.gpu_memory_free_gb,
                floor_gb: self.config.min_gpu_memory_gb,
            });
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ProcProbe, StaticProbe};

    fn monitor(probe: Arc<StaticProbe>) -> ResourceMonitor {
        ResourceMonitor::new(probe, ResourceConfig::default(), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn healthy_sample_admits() {
        let monitor = monitor(Arc::new(StaticProbe::healthy()));
        assert!(monitor.check_resources().await);
        assert!(monitor.poll().await.healthy);
    }

    #[tokio::test]
    async fn memory_floor_refuses_admission() {
        let probe = Arc::new(StaticProbe::healthy());
        probe.update(|s| s.memory_available_gb = 1.5);
        let monitor = monitor(Arc::clone(&probe));

        assert!(!monitor.check_resources().await);
        let health = monitor.poll().await;
        assert!(!health.healthy);
        assert!(health
            .violations
            .iter()
            .any(|v| matches!(v, Violation::MemoryFloor { .. })));
    }

    #[test]
    fn cpu_threshold_only_when_configured() {
        let sample = ResourceSample {
            memory_available_gb: 12.0,
            memory_total_gb: 16.0,
            cpu_percent: 97.0,
            ..ResourceSample::default()
        };
        let monitor = monitor(Arc::new(StaticProbe::healthy()));
        assert!(monitor.evaluate(&sample).healthy);

        let config = ResourceConfig {
            cpu_threshold: Some(0.8),
            ..ResourceConfig::default()
        };
        let monitor = ResourceMonitor::new(
            Arc::new(StaticProbe::healthy()),
            config,
            Duration::from_millis(100),
        );
        let health = monitor.evaluate(&sample);
        assert_eq!(
            health.violations,
            vec![Violation::Cpu {
                usage: 0.97,
                threshold: 0.8
            }]
        );
    }

    #[tokio::test]
    async fn proc_probe_disk_usage_over_threshold_is_pressure() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(
            root.path().join("meminfo"),
            "MemTotal: 16777216 kB\nMemAvailable: 12582912 kB\n",
        )
        .unwrap();
        let probe = ProcProbe::with_root(root.path()).with_disk_path(root.path());

        // Any used space on the scratch filesystem is over this threshold.
        let config = ResourceConfig {
            disk_threshold: f64::MIN_POSITIVE,
            ..ResourceConfig::default()
        };
        let monitor = ResourceMonitor::new(Arc::new(probe), config, Duration::from_secs(5));

        let health = monitor.poll().await;
        assert!(!health.healthy);
        assert!(matches!(
            health.violations.as_slice(),
            [Violation::Disk { .. }]
        ));
        // Disk pressure is not an admission floor.
        assert!(monitor.check_resources().await);
    }

    #[tokio::test]
    async fn gpu_floor_only_with_gpu() {
        let probe = Arc::new(StaticProbe::healthy());
        probe.update(|s| {
            s.gpu_available = false;
            s.gpu_memory_free_gb = 0.5;
        });
        let monitor = monitor(Arc::clone(&probe));
        assert!(monitor.check_resources().await);

        probe.update(|s| {
            s.gpu_available = true;
            s.gpu_memory_total_gb = 24.0;
        });
        assert!(!monitor.check_resources().await);
    }

    #[tokio::test]
    async fn probe_error_counts_as_pressure() {
        let probe = Arc::new(StaticProbe::healthy());
        probe.fail(ProbeError::Unavailable("nvml".into()));
        let monitor = monitor(Arc::clone(&probe));

        assert!(!monitor.check_resources().await);
        let health = monitor.poll().await;
        assert!(matches!(
            health.violations.as_slice(),
            [Violation::ProbeUnavailable { .. }]
        ));
    }

    #[tokio::test]
    async fn slow_probe_counts_as_pressure() {
        let probe = Arc::new(StaticProbe::healthy());
        probe.set_delay(Duration::from_millis(500));
        let monitor = monitor(Arc::clone(&probe));

        assert!(matches!(monitor.sample().await, Err(ProbeError::Timeout(_))));
        assert!(!monitor.poll().await.healthy);
    }

    #[test]
    fn any_threshold_is_pressure() {
        let monitor = monitor(Arc::new(StaticProbe::healthy()));
        let base = ResourceSample {
            memory_available_gb: 12.0,
            memory_total_gb: 16.0,
            disk_free_gb: 400.0,
            disk_total_gb: 500.0,
            ..ResourceSample::default()
        };
        assert!(monitor.evaluate(&base).healthy);

        let memory = ResourceSample {
            memory_available_gb: 2.5,
            ..base.clone()
        };
        let health = monitor.evaluate(&memory);
        assert!(matches!(
            health.violations.as_slice(),
            [Violation::Memory { .. }]
        ));

        let disk = ResourceSample {
            disk_free_gb: 10.0,
            ..base.clone()
        };
        assert!(matches!(
            monitor.evaluate(&disk).violations.as_slice(),
            [Violation::Disk { .. }]
        ));

        let gpu = ResourceSample {
            gpu_available: true,
            gpu_memory_free_gb: 2.2,
            gpu_memory_total_gb: 40.0,
            ..base
        };
        assert!(matches!(
            monitor.evaluate(&gpu).violations.as_slice(),
            [Violation::GpuMemory { .. }]
        ));
    }
}
