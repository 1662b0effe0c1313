//! Host resource probe feeding the memory-pressure logic.

use crate::telemetry;
use serde::Serialize;
use sysinfo::System;

/// Memory usage above this triggers a cleanup pass.
pub const CLEANUP_THRESHOLD_PERCENT: f32 = 80.0;
/// Memory usage above this enters degraded admission.
pub const DEGRADE_THRESHOLD_PERCENT: f32 = 90.0;
/// Degraded admission clears once memory falls back under this.
pub const RECOVER_THRESHOLD_PERCENT: f32 = 75.0;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

impl ResourceSample {
    pub fn memory_pressure(&self) -> MemoryPressure {
        if self.memory_percent > DEGRADE_THRESHOLD_PERCENT {
            MemoryPressure::Critical
        } else if self.memory_percent > CLEANUP_THRESHOLD_PERCENT {
            MemoryPressure::Elevated
        } else {
            MemoryPressure::Nominal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    Nominal,
    Elevated,
    Critical,
}

/// Wraps `sysinfo` so callers only see percentages. CPU usage needs two
/// samples to be meaningful; the monitor loop's cadence provides that.
pub struct ResourceProbe {
    sys: System,
}

impl ResourceProbe {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }

    pub fn sample(&mut self) -> ResourceSample {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_usage();

        let total = self.sys.total_memory().max(1);
        let memory_percent = (self.sys.used_memory() as f64 / total as f64 * 100.0) as f32;
        let cpu_percent = self.sys.global_cpu_usage();

        telemetry::CPU_USAGE_PERCENT.set(cpu_percent as i64);
        telemetry::MEMORY_USAGE_PERCENT.set(memory_percent as i64);

        ResourceSample {
            cpu_percent,
            memory_percent,
        }
    }
}

impl Default for ResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_classification() {
        let sample = |m| ResourceSample {
            cpu_percent: 0.0,
            memory_percent: m,
        };
        assert_eq!(sample(40.0).memory_pressure(), MemoryPressure::Nominal);
        assert_eq!(sample(85.0).memory_pressure(), MemoryPressure::Elevated);
        assert_eq!(sample(95.0).memory_pressure(), MemoryPressure::Critical);
    }

    #[test]
    fn probe_reports_percentages() {
        let mut probe = ResourceProbe::new();
        let sample = probe.sample();
        assert!(sample.memory_percent >= 0.0 && sample.memory_percent <= 100.0);
    }
}
