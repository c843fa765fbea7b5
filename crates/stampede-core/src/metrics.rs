use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag set attached to metric events and used by threshold selectors.
pub type TagSet = BTreeMap<String, String>;

/// Aggregation discipline of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic sum of emitted values.
    Counter,
    /// Value distribution; supports percentile estimation.
    Trend,
    /// Ratio of non-zero samples to all samples.
    Rate,
}

impl MetricKind {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Trend => "trend",
            Self::Rate => "rate",
        }
    }
}

impl FromStr for MetricKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(Self::Counter),
            "trend" => Ok(Self::Trend),
            "rate" => Ok(Self::Rate),
            _ => Err(()),
        }
    }
}

/// One metric sample produced by a workload invocation. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    /// Metric name, e.g. `iteration_duration`.
    pub name: String,
    /// Aggregation discipline.
    pub kind: MetricKind,
    /// Sample value. For `Rate`, non-zero counts as a pass.
    pub value: f64,
    /// Tags identifying the series this sample belongs to.
    pub tags: TagSet,
    /// Wall-clock time the sample was taken.
    pub timestamp: DateTime<Utc>,
}

impl MetricEvent {
    /// Creates a counter increment.
    #[must_use]
    pub fn counter(name: impl Into<String>, value: f64, tags: TagSet) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Counter,
            value,
            tags,
            timestamp: Utc::now(),
        }
    }

    /// Creates a trend sample (e.g. a latency observation in milliseconds).
    #[must_use]
    pub fn trend(name: impl Into<String>, value: f64, tags: TagSet) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Trend,
            value,
            tags,
            timestamp: Utc::now(),
        }
    }

    /// Creates a rate sample; `pass` becomes 1.0, failure 0.0.
    #[must_use]
    pub fn rate(name: impl Into<String>, pass: bool, tags: TagSet) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Rate,
            value: if pass { 1.0 } else { 0.0 },
            tags,
            timestamp: Utc::now(),
        }
    }
}

/// Names of the metrics the engine itself emits.
pub mod builtin {
    /// Counter: one per completed iteration, tagged `status`.
    pub const ITERATIONS: &str = "iterations";
    /// Trend: wall-clock iteration duration in milliseconds.
    pub const ITERATION_DURATION: &str = "iteration_duration";
    /// Counter: iterations whose workload returned an error.
    pub const ITERATIONS_FAILED: &str = "iterations_failed";
    /// Counter: iterations cancelled by the per-iteration deadline.
    pub const ITERATIONS_TIMED_OUT: &str = "iterations_timed_out";
    /// Counter: in-flight iterations force-cancelled after the graceful-stop
    /// window.
    pub const ITERATIONS_CANCELLED: &str = "iterations_cancelled";
    /// Counter: arrival-rate starts dropped because no VU was available.
    pub const DROPPED_ITERATIONS: &str = "dropped_iterations";
    /// Rate: named boolean checks recorded by workloads.
    pub const CHECKS: &str = "checks";
    /// Tag key carrying the iteration outcome on `iterations` events.
    pub const STATUS_TAG: &str = "status";
    /// Tag key carrying the scenario name on every event.
    pub const SCENARIO_TAG: &str = "scenario";
    /// Tag key carrying the check name on `checks` events.
    pub const CHECK_TAG: &str = "check";
}
