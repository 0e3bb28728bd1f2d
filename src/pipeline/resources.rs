//! Host CPU and memory sampling for the stats snapshot.

use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::System;

/// How often the primary loop refreshes resource usage.
pub const RESOURCE_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// System-wide usage, both in percent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Samples host usage at most once per interval.
///
/// The `System` is kept between samples so CPU usage is measured over the
/// time since the previous refresh. The first sample therefore reads 0% CPU.
pub struct ResourceSampler {
    system: System,
    interval: Duration,
    last: Option<Instant>,
}

impl ResourceSampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            system: System::new(),
            interval,
            last: None,
        }
    }

    /// Refresh and return usage when the interval has elapsed since the
    /// previous sample. The first call always samples.
    pub fn poll(&mut self, now: Instant) -> Option<ResourceUsage> {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }
        self.last = Some(now);
        Some(self.sample())
    }

    fn sample(&mut self) -> ResourceUsage {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpus = self.system.cpus();
        let cpu_percent = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };
        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };

        ResourceUsage {
            cpu_percent: cpu_percent.clamp(0.0, 100.0),
            memory_percent: memory_percent.clamp(0.0, 100.0),
        }
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new(RESOURCE_SAMPLE_INTERVAL)
    }
}
