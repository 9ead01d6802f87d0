//! Kernel configuration.
//!
//! Collaborators hand the kernel a YAML or JSON string; every field has a
//! default, so an empty document is a valid configuration.
//!
//! # Configuration Structure
//!
//! ```yaml
//! start_time: 0
//! export_interval: 300000     # ms between telemetry samples, null disables
//! max_scheduling_failures: 10
//! cpu_allocation_ratio: 1.0
//! ram_allocation_ratio: 1.0
//! utilization_cap: 1.0
//! seed: 0
//! max_propagation_steps: 100000
//! log_level: info
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SimTime;

/// Errors that can occur while loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Parameters of one simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Virtual time the run starts at, in ms
    #[serde(default)]
    pub start_time: SimTime,

    /// Interval between telemetry samples, in ms
    #[serde(default = "default_export_interval")]
    pub export_interval: Option<SimTime>,

    /// Consecutive placement failures tolerated
    #[serde(default = "default_max_scheduling_failures")]
    pub max_scheduling_failures: u32,

    /// vCPU overcommit ratio used by placement
    #[serde(default = "default_ratio")]
    pub cpu_allocation_ratio: f64,

    /// Memory overcommit ratio used by placement
    #[serde(default = "default_ratio")]
    pub ram_allocation_ratio: f64,

    /// Default utilization bound of bounded workloads, in (0, 1]
    #[serde(default = "default_ratio")]
    pub utilization_cap: f64,

    /// Seed of the run's random generator
    #[serde(default)]
    pub seed: u64,

    /// Bound on stage invocations per propagation
    #[serde(default = "default_max_propagation_steps")]
    pub max_propagation_steps: u64,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_export_interval() -> Option<SimTime> {
    Some(300_000)
}

fn default_max_scheduling_failures() -> u32 {
    10
}

fn default_ratio() -> f64 {
    1.0
}

fn default_max_propagation_steps() -> u64 {
    crate::flow::DEFAULT_MAX_PROPAGATION_STEPS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            start_time: 0,
            export_interval: default_export_interval(),
            max_scheduling_failures: default_max_scheduling_failures(),
            cpu_allocation_ratio: default_ratio(),
            ram_allocation_ratio: default_ratio(),
            utilization_cap: default_ratio(),
            seed: 0,
            max_propagation_steps: default_max_propagation_steps(),
            log_level: default_log_level(),
        }
    }
}

impl KernelConfig {
    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: KernelConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: KernelConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to a YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to a JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.export_interval == Some(0) {
            return Err(ConfigError::Validation("export_interval must be positive".to_string()));
        }
        for (name, ratio) in [
            ("cpu_allocation_ratio", self.cpu_allocation_ratio),
            ("ram_allocation_ratio", self.ram_allocation_ratio),
        ] {
            if !(ratio > 0.0 && ratio.is_finite()) {
                return Err(ConfigError::Validation(format!("{name} must be positive, got {ratio}")));
            }
        }
        if !(self.utilization_cap > 0.0 && self.utilization_cap <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "utilization_cap must be in (0, 1], got {}",
                self.utilization_cap
            )));
        }
        if self.max_propagation_steps == 0 {
            return Err(ConfigError::Validation("max_propagation_steps must be positive".to_string()));
        }
        Ok(())
    }
}

/// Builder for creating a [`KernelConfig`] programmatically.
#[derive(Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the start time.
    pub fn start_time(mut self, time: SimTime) -> Self {
        self.config.start_time = time;
        self
    }

    /// Sets the telemetry interval; `None` disables sampling.
    pub fn export_interval(mut self, interval: Option<SimTime>) -> Self {
        self.config.export_interval = interval;
        self
    }

    /// Sets the tolerated consecutive placement failures.
    pub fn max_scheduling_failures(mut self, max: u32) -> Self {
        self.config.max_scheduling_failures = max;
        self
    }

    /// Sets the vCPU and memory overcommit ratios.
    pub fn allocation_ratios(mut self, cpu: f64, ram: f64) -> Self {
        self.config.cpu_allocation_ratio = cpu;
        self.config.ram_allocation_ratio = ram;
        self
    }

    /// Sets the default workload utilization bound.
    pub fn utilization_cap(mut self, cap: f64) -> Self {
        self.config.utilization_cap = cap;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Sets the propagation bound.
    pub fn max_propagation_steps(mut self, steps: u64) -> Self {
        self.config.max_propagation_steps = steps;
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<KernelConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
