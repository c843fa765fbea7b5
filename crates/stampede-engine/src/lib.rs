//! Scenario-driven load-generation engine.
//!
//! Given a compiled scenario document, the engine schedules many concurrent
//! virtual-user iterations against an opaque workload function according to
//! one of three traffic-shaping strategies, aggregates timing/outcome
//! metrics without a hot-path bottleneck, and evaluates declared pass/fail
//! thresholds at run end.

pub mod aggregator;
pub mod executor;
pub mod invoker;
pub mod rate;
pub mod runner;
pub mod shared_pool;
pub mod summary;
pub mod vu;

pub use aggregator::{
    AggregatedMetric, MetricsAggregator, MetricsHandle, MetricsSnapshot, SeriesKey, TrendState,
};
pub use executor::{run_scenario, ExecutorContext};
pub use invoker::{IterationContext, IterationOutcome, Invoker, Workload, WorkloadFailure};
pub use rate::RateController;
pub use runner::{Runner, WorkloadRegistry};
pub use shared_pool::SharedPool;
pub use summary::{
    evaluate_thresholds, JsonLinesSink, MetricRow, MetricsSink, RunSummary, ThresholdVerdict,
};
pub use vu::{VuLease, VuPool, VuState};
