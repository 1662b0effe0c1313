use serde::Deserialize;
use std::path::Path;

/// Scheduler-side configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Advertised link capacity in Hz, used for admission statistics only.
    pub max_bandwidth: u32,
    /// Per-class queue cap; also bounds the active-message population.
    pub max_queue_size: usize,
    pub memory_limit_mb: usize,
    pub enable_adaptive_scheduling: bool,
    pub enable_performance_monitoring: bool,
    /// Default budget for a single admission attempt.
    pub admit_timeout_ms: u64,
    /// Grace period for in-flight work during shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_bandwidth: 50_000,
            max_queue_size: 10_000,
            memory_limit_mb: 512,
            enable_adaptive_scheduling: true,
            enable_performance_monitoring: true,
            admit_timeout_ms: 10_000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_bandwidth == 0 {
            return Err("max_bandwidth must be positive".into());
        }
        if self.max_queue_size == 0 {
            return Err("max_queue_size must be positive".into());
        }
        if self.memory_limit_mb == 0 {
            return Err("memory_limit_mb must be positive".into());
        }
        Ok(())
    }
}

/// Initial LDPC code parameters plus codec-side limits.
#[derive(Debug, Clone)]
pub struct LdpcConfig {
    pub code_rate: f64,
    pub block_length: usize,
    pub max_iterations: usize,
    pub syndrome_threshold: f64,
    pub enable_adaptive_mode: bool,
    /// Ceiling for matrix generation, in megabytes.
    pub memory_limit_mb: usize,
}

impl Default for LdpcConfig {
    fn default() -> Self {
        Self {
            code_rate: 0.5,
            block_length: 1024,
            max_iterations: 50,
            syndrome_threshold: 1e-6,
            enable_adaptive_mode: true,
            memory_limit_mb: 256,
        }
    }
}

impl LdpcConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.code_rate > 0.0 && self.code_rate < 1.0) {
            return Err("code_rate must be between 0 and 1".into());
        }
        if self.block_length == 0 {
            return Err("block_length must be positive".into());
        }
        if (self.block_length as f64 * self.code_rate) < 1.0 {
            return Err("block_length * code_rate must yield at least one information bit".into());
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be positive".into());
        }
        if self.syndrome_threshold <= 0.0 {
            return Err("syndrome_threshold must be positive".into());
        }
        if self.memory_limit_mb == 0 {
            return Err("memory_limit_mb must be positive".into());
        }
        Ok(())
    }

    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_mb * 1024 * 1024
    }
}

/// Unified configuration parsed from a TOML file.
#[derive(Debug, Clone, Default)]
pub struct LinkConfig {
    pub scheduler: SchedulerConfig,
    pub ldpc: LdpcConfig,
}

impl LinkConfig {
    /// Load configuration from a TOML string. Missing sections and fields
    /// fall back to defaults.
    pub fn from_toml(s: &str) -> Result<Self, Box<dyn std::error::Error>> {
        #[derive(Deserialize)]
        struct Root {
            scheduler: Option<SchedulerSection>,
            ldpc: Option<LdpcSection>,
        }

        #[derive(Deserialize, Default)]
        struct SchedulerSection {
            max_bandwidth: Option<u32>,
            max_queue_size: Option<usize>,
            memory_limit_mb: Option<usize>,
            enable_adaptive_scheduling: Option<bool>,
            enable_performance_monitoring: Option<bool>,
            admit_timeout_ms: Option<u64>,
            shutdown_timeout_secs: Option<u64>,
        }

        #[derive(Deserialize, Default)]
        struct LdpcSection {
            code_rate: Option<f64>,
            block_length: Option<usize>,
            max_iterations: Option<usize>,
            syndrome_threshold: Option<f64>,
            enable_adaptive_mode: Option<bool>,
            memory_limit_mb: Option<usize>,
        }

        let raw: Root = toml::from_str(s)?;
        let sched = raw.scheduler.unwrap_or_default();
        let ldpc = raw.ldpc.unwrap_or_default();
        let sched_defaults = SchedulerConfig::default();
        let ldpc_defaults = LdpcConfig::default();

        Ok(Self {
            scheduler: SchedulerConfig {
                max_bandwidth: sched.max_bandwidth.unwrap_or(sched_defaults.max_bandwidth),
                max_queue_size: sched.max_queue_size.unwrap_or(sched_defaults.max_queue_size),
                memory_limit_mb: sched.memory_limit_mb.unwrap_or(sched_defaults.memory_limit_mb),
                enable_adaptive_scheduling: sched
                    .enable_adaptive_scheduling
                    .unwrap_or(sched_defaults.enable_adaptive_scheduling),
                enable_performance_monitoring: sched
                    .enable_performance_monitoring
                    .unwrap_or(sched_defaults.enable_performance_monitoring),
                admit_timeout_ms: sched.admit_timeout_ms.unwrap_or(sched_defaults.admit_timeout_ms),
                shutdown_timeout_secs: sched
                    .shutdown_timeout_secs
                    .unwrap_or(sched_defaults.shutdown_timeout_secs),
            },
            ldpc: LdpcConfig {
                code_rate: ldpc.code_rate.unwrap_or(ldpc_defaults.code_rate),
                block_length: ldpc.block_length.unwrap_or(ldpc_defaults.block_length),
                max_iterations: ldpc.max_iterations.unwrap_or(ldpc_defaults.max_iterations),
                syndrome_threshold: ldpc
                    .syndrome_threshold
                    .unwrap_or(ldpc_defaults.syndrome_threshold),
                enable_adaptive_mode: ldpc
                    .enable_adaptive_mode
                    .unwrap_or(ldpc_defaults.enable_adaptive_mode),
                memory_limit_mb: ldpc.memory_limit_mb.unwrap_or(ldpc_defaults.memory_limit_mb),
            },
        })
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Validate all sub-configurations.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler.validate()?;
        self.ldpc.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_toml() {
        let cfg_str = r#"
            [scheduler]
            max_bandwidth = 20000
            max_queue_size = 64
            enable_adaptive_scheduling = false

            [ldpc]
            code_rate = 0.33
            block_length = 2048
            max_iterations = 25
        "#;
        let cfg = LinkConfig::from_toml(cfg_str).unwrap();
        assert_eq!(cfg.scheduler.max_bandwidth, 20_000);
        assert_eq!(cfg.scheduler.max_queue_size, 64);
        assert!(!cfg.scheduler.enable_adaptive_scheduling);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.scheduler.memory_limit_mb, 512);
        assert!((cfg.ldpc.code_rate - 0.33).abs() < 1e-9);
        assert_eq!(cfg.ldpc.block_length, 2048);
        assert_eq!(cfg.ldpc.max_iterations, 25);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_rate() {
        let mut cfg = LinkConfig::default();
        cfg.ldpc.code_rate = 1.5;
        assert!(cfg.validate().is_err());
    }
}
