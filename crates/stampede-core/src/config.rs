//! Engine configuration.
//!
//! This module provides the runtime tunables of the engine itself (tick
//! granularity, metric reservoir sizing, default grace periods) with:
//! - YAML configuration files
//! - Environment variable overrides
//! - Reasonable defaults
//! - Configuration validation
//!
//! Scenario documents are configured separately (see [`crate::document`]);
//! this file only covers knobs an operator rarely touches per run.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::document::CompileDefaults;

/// Root configuration structure for the engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub resources: ResourcesConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

impl EngineConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file specified by STAMPEDE_CONFIG env var
    /// 3. ./stampede.yaml
    /// 4. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        if let Ok(config_path) = std::env::var("STAMPEDE_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(File::with_name("./stampede").required(false));

        // Override with environment variables
        // Example: STAMPEDE__SCHEDULER__TICK_MS=50
        // (single-underscore STAMPEDE_* names are scenario overrides and are
        // not picked up here)
        builder = builder.add_source(
            Environment::with_prefix("STAMPEDE")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Scheduler
            .set_default("scheduler.tick_ms", 100)?
            .set_default("scheduler.ramp_sample_ms", 1000)?
            // Metrics
            .set_default("metrics.reservoir_size", 1024)?
            // Shared resources
            .set_default("resources.capacity", 100)?
            // Limits
            .set_default("limits.default_graceful_stop_secs", 30)?
            .set_default("limits.default_iteration_timeout_secs", 60)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_ms == 0 {
            return Err(ConfigError::Message(
                "scheduler.tick_ms must be > 0".to_string(),
            ));
        }

        if self.scheduler.ramp_sample_ms == 0 {
            return Err(ConfigError::Message(
                "scheduler.ramp_sample_ms must be > 0".to_string(),
            ));
        }

        if self.metrics.reservoir_size == 0 {
            return Err(ConfigError::Message(
                "metrics.reservoir_size must be > 0".to_string(),
            ));
        }

        if self.resources.capacity == 0 {
            return Err(ConfigError::Message(
                "resources.capacity must be > 0".to_string(),
            ));
        }

        if self.limits.default_iteration_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "limits.default_iteration_timeout_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: EngineConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Defaults handed to scenario compilation.
    #[must_use]
    pub fn compile_defaults(&self) -> CompileDefaults {
        CompileDefaults {
            graceful_stop: Duration::from_secs(self.limits.default_graceful_stop_secs),
            iteration_timeout: Duration::from_secs(self.limits.default_iteration_timeout_secs),
        }
    }
}

/// Scheduling granularity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Arrival-rate token tick in milliseconds.
    pub tick_ms: u64,

    /// Ramping-vus reconciliation interval in milliseconds.
    pub ramp_sample_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            ramp_sample_ms: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Arrival-rate tick as a Duration.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Ramp sampling interval as a Duration.
    pub fn ramp_sample(&self) -> Duration {
        Duration::from_millis(self.ramp_sample_ms)
    }
}

/// Metric aggregation tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Trend reservoir size used for percentile estimation.
    pub reservoir_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            reservoir_size: 1024,
        }
    }
}

/// Shared resource pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourcesConfig {
    /// Capacity of the run-wide shared resource pool.
    pub capacity: usize,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Default deadlines applied where scenarios are silent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Default grace period after admission stops, in seconds.
    pub default_graceful_stop_secs: u64,

    /// Default per-iteration deadline, in seconds.
    pub default_iteration_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_graceful_stop_secs: 30,
            default_iteration_timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = EngineConfig::default();

        assert_eq!(config.scheduler.tick_ms, 100);
        assert_eq!(config.scheduler.ramp_sample_ms, 1000);
        assert_eq!(config.metrics.reservoir_size, 1024);
        assert_eq!(config.resources.capacity, 100);
        assert_eq!(config.limits.default_graceful_stop_secs, 30);
        assert_eq!(config.limits.default_iteration_timeout_secs, 60);
    }

    #[test]
    fn test_duration_helpers() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.tick(), Duration::from_millis(100));
        assert_eq!(scheduler.ramp_sample(), Duration::from_secs(1));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = EngineConfig::default();

        config.scheduler.tick_ms = 0;
        assert!(config.validate().is_err());

        config.scheduler.tick_ms = 100;
        assert!(config.validate().is_ok());

        config.metrics.reservoir_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_compile_defaults_mirror_limits() {
        let mut config = EngineConfig::default();
        config.limits.default_graceful_stop_secs = 10;
        let defaults = config.compile_defaults();
        assert_eq!(defaults.graceful_stop, Duration::from_secs(10));
        assert_eq!(defaults.iteration_timeout, Duration::from_secs(60));
    }
}
