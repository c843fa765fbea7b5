use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Traffic-shaping strategy of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    /// Fixed number of VUs iterating back-to-back for a fixed duration.
    ConstantVus,
    /// VU count tracks a piecewise-linear target curve.
    RampingVus,
    /// Iteration starts track a piecewise-linear rate curve, decoupled from
    /// concurrency.
    RampingArrivalRate,
}

impl ExecutorKind {
    /// Returns the canonical kebab-case name used in scenario documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConstantVus => "constant-vus",
            Self::RampingVus => "ramping-vus",
            Self::RampingArrivalRate => "ramping-arrival-rate",
        }
    }
}

impl FromStr for ExecutorKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constant-vus" => Ok(Self::ConstantVus),
            "ramping-vus" => Ok(Self::RampingVus),
            "ramping-arrival-rate" => Ok(Self::RampingArrivalRate),
            other => Err(CoreError::config(format!("unknown executor `{other}`"))),
        }
    }
}

/// One segment of a ramp: interpolate from the previous target to `target`
/// over `duration`.
///
/// The stage sequence defines a continuous piecewise-linear curve: stage *i*
/// starts at the value stage *i-1* ended on (or the scenario's start value),
/// so there is no discontinuity at a boundary by construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// How long this segment lasts. A zero-duration stage jumps instantly.
    pub duration: Duration,
    /// Target value at the end of the segment (VU count or starts per
    /// `time_unit`, depending on the executor).
    pub target: f64,
}

impl Stage {
    /// Creates a stage ramping to `target` over `duration`.
    #[must_use]
    pub fn new(duration: Duration, target: f64) -> Self {
        Self { duration, target }
    }
}

/// Executor-specific portion of a compiled scenario.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionPlan {
    /// `vus` workers iterating in a tight loop for `duration`.
    ConstantVus { vus: u32, duration: Duration },
    /// Live worker count tracks the stage curve starting from `start_vus`.
    RampingVus { start_vus: u32, stages: Vec<Stage> },
    /// Iteration starts per `time_unit` track the stage curve starting from
    /// `start_rate`; concurrency floats between `pre_allocated_vus` and
    /// `max_vus`.
    RampingArrivalRate {
        start_rate: f64,
        time_unit: Duration,
        pre_allocated_vus: u32,
        max_vus: u32,
        stages: Vec<Stage>,
    },
}

impl ExecutionPlan {
    /// Returns the executor kind this plan belongs to.
    #[must_use]
    pub const fn kind(&self) -> ExecutorKind {
        match self {
            Self::ConstantVus { .. } => ExecutorKind::ConstantVus,
            Self::RampingVus { .. } => ExecutorKind::RampingVus,
            Self::RampingArrivalRate { .. } => ExecutorKind::RampingArrivalRate,
        }
    }

    /// Total scheduled run time, excluding the graceful-stop window.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        match self {
            Self::ConstantVus { duration, .. } => *duration,
            Self::RampingVus { stages, .. } | Self::RampingArrivalRate { stages, .. } => stages
                .iter()
                .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration)),
        }
    }

    /// Upper bound on concurrently live VUs this plan may reach.
    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        match self {
            Self::ConstantVus { vus, .. } => *vus,
            Self::RampingVus { start_vus, stages } => {
                let peak = stages
                    .iter()
                    .map(|s| s.target)
                    .fold(*start_vus as f64, f64::max);
                peak.ceil() as u32
            }
            Self::RampingArrivalRate { max_vus, .. } => *max_vus,
        }
    }
}

/// Immutable compiled scenario: one entry of a scenario document after
/// defaults, environment overrides, and validation have been applied.
#[derive(Debug, Clone)]
pub struct ScenarioSpec {
    /// Scenario name (also attached to every metric as the `scenario` tag).
    pub name: String,
    /// Registered workload function to invoke once per iteration.
    pub exec: String,
    /// Tags stamped onto every metric event this scenario produces.
    pub tags: BTreeMap<String, String>,
    /// Grace period for in-flight iterations after admission stops.
    pub graceful_stop: Duration,
    /// Per-iteration deadline enforced by the workload invoker.
    pub iteration_timeout: Duration,
    /// Executor-specific schedule.
    pub plan: ExecutionPlan,
}

impl ScenarioSpec {
    /// Validates the compiled spec. Any violation is a fatal `ConfigError`;
    /// the run never starts.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::config("scenario name must not be empty"));
        }
        if self.iteration_timeout.is_zero() {
            return Err(self.invalid("iterationTimeout must be > 0"));
        }

        match &self.plan {
            ExecutionPlan::ConstantVus { vus, duration } => {
                if *vus == 0 {
                    return Err(self.invalid("vus must be >= 1"));
                }
                if duration.is_zero() {
                    return Err(self.invalid("duration must be > 0"));
                }
            }
            ExecutionPlan::RampingVus { stages, .. } => {
                self.validate_stages(stages)?;
            }
            ExecutionPlan::RampingArrivalRate {
                start_rate,
                time_unit,
                pre_allocated_vus,
                max_vus,
                stages,
            } => {
                self.validate_stages(stages)?;
                if *start_rate < 0.0 {
                    return Err(self.invalid("startRate must be >= 0"));
                }
                if time_unit.is_zero() {
                    return Err(self.invalid("timeUnit must be > 0"));
                }
                if *pre_allocated_vus == 0 {
                    return Err(self.invalid("preAllocatedVUs must be >= 1"));
                }
                if max_vus < pre_allocated_vus {
                    return Err(self.invalid("maxVUs must be >= preAllocatedVUs"));
                }
            }
        }

        Ok(())
    }

    fn validate_stages(&self, stages: &[Stage]) -> CoreResult<()> {
        if stages.is_empty() {
            return Err(self.invalid("stages must not be empty"));
        }
        if stages.iter().all(|s| s.duration.is_zero()) {
            return Err(self.invalid("stage durations must not sum to zero"));
        }
        if let Some(bad) = stages.iter().find(|s| s.target < 0.0 || !s.target.is_finite()) {
            return Err(self.invalid(format!(
                "stage target {} must be a non-negative finite number",
                bad.target
            )));
        }
        Ok(())
    }

    fn invalid(&self, message: impl std::fmt::Display) -> CoreError {
        CoreError::config(format!("scenario `{}`: {message}", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec(plan: ExecutionPlan) -> ScenarioSpec {
        ScenarioSpec {
            name: "checkout".to_string(),
            exec: "default".to_string(),
            tags: BTreeMap::new(),
            graceful_stop: Duration::from_secs(30),
            iteration_timeout: Duration::from_secs(60),
            plan,
        }
    }

    #[test]
    fn test_executor_kind_round_trip() {
        for kind in [
            ExecutorKind::ConstantVus,
            ExecutorKind::RampingVus,
            ExecutorKind::RampingArrivalRate,
        ] {
            assert_eq!(kind.as_str().parse::<ExecutorKind>().unwrap(), kind);
        }
        assert!("constant-arrival-rate".parse::<ExecutorKind>().is_err());
    }

    #[test]
    fn test_constant_vus_validation() {
        let ok = base_spec(ExecutionPlan::ConstantVus {
            vus: 5,
            duration: Duration::from_secs(10),
        });
        assert!(ok.validate().is_ok());

        let no_vus = base_spec(ExecutionPlan::ConstantVus {
            vus: 0,
            duration: Duration::from_secs(10),
        });
        assert!(no_vus.validate().is_err());

        let no_duration = base_spec(ExecutionPlan::ConstantVus {
            vus: 5,
            duration: Duration::ZERO,
        });
        assert!(no_duration.validate().is_err());
    }

    #[test]
    fn test_stage_validation() {
        let zero_sum = base_spec(ExecutionPlan::RampingVus {
            start_vus: 0,
            stages: vec![Stage::new(Duration::ZERO, 10.0)],
        });
        assert!(zero_sum.validate().is_err());

        let negative = base_spec(ExecutionPlan::RampingVus {
            start_vus: 0,
            stages: vec![Stage::new(Duration::from_secs(5), -1.0)],
        });
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_arrival_rate_bounds() {
        let stages = vec![Stage::new(Duration::from_secs(10), 50.0)];

        let inverted = base_spec(ExecutionPlan::RampingArrivalRate {
            start_rate: 10.0,
            time_unit: Duration::from_secs(1),
            pre_allocated_vus: 20,
            max_vus: 10,
            stages: stages.clone(),
        });
        assert!(inverted.validate().is_err());

        let ok = base_spec(ExecutionPlan::RampingArrivalRate {
            start_rate: 10.0,
            time_unit: Duration::from_secs(1),
            pre_allocated_vus: 10,
            max_vus: 20,
            stages,
        });
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_max_concurrency_is_stage_peak() {
        let plan = ExecutionPlan::RampingVus {
            start_vus: 2,
            stages: vec![
                Stage::new(Duration::from_secs(10), 8.0),
                Stage::new(Duration::from_secs(10), 3.0),
            ],
        };
        assert_eq!(plan.max_concurrency(), 8);
        assert_eq!(plan.total_duration(), Duration::from_secs(20));
    }
}
