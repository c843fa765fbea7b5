//! Core domain types for the Stampede load-generation engine.

pub mod config;
pub mod document;
pub mod error;
pub mod metrics;
pub mod scenario;
pub mod threshold;

pub use config::{EngineConfig, LimitsConfig, MetricsConfig, ResourcesConfig, SchedulerConfig};
pub use document::{
    CompileDefaults, CompiledDocument, DurationField, EnvOverrides, ScenarioDocument,
    ScenarioEntry, StageEntry, ThresholdExprs,
};
pub use error::{CoreError, CoreResult};
pub use metrics::{builtin, MetricEvent, MetricKind, TagSet};
pub use scenario::{ExecutionPlan, ExecutorKind, ScenarioSpec, Stage};
pub use threshold::{Op, Stat, ThresholdSpec};
