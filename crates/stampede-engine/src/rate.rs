//! Piecewise-linear target curves.
//!
//! A [`RateController`] is a pure function of elapsed time: given the ramp
//! stages of a scenario it answers "what is the target value right now",
//! a VU count for ramping-vus or a start rate for ramping-arrival-rate. It
//! owns no clock and has no side effects, which is what makes executor
//! schedules testable without running one.

use std::time::Duration;

use stampede_core::{CoreError, CoreResult, Stage};

/// Interpolates a continuous piecewise-linear target curve over a stage
/// sequence.
///
/// Stage *i* ramps from the previous stage's target (or `initial`) to its own
/// target over its duration, so the value at a stage boundary equals both the
/// prior stage's end and the next stage's start. A zero-duration stage jumps
/// to its target instantly. Past the final stage the curve holds the final
/// target.
#[derive(Debug, Clone)]
pub struct RateController {
    initial: f64,
    stages: Vec<Stage>,
    total: Duration,
}

impl RateController {
    /// Builds a controller, rejecting curves that cannot be scheduled: all
    /// stage durations zero, or any negative/non-finite target.
    pub fn new(initial: f64, stages: &[Stage]) -> CoreResult<Self> {
        if initial < 0.0 || !initial.is_finite() {
            return Err(CoreError::config(format!(
                "ramp start value {initial} must be a non-negative finite number"
            )));
        }
        if stages.is_empty() || stages.iter().all(|s| s.duration.is_zero()) {
            return Err(CoreError::config("stage durations must not sum to zero"));
        }
        if let Some(bad) = stages.iter().find(|s| s.target < 0.0 || !s.target.is_finite()) {
            return Err(CoreError::config(format!(
                "stage target {} must be a non-negative finite number",
                bad.target
            )));
        }

        let total = stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration));
        Ok(Self {
            initial,
            stages: stages.to_vec(),
            total,
        })
    }

    /// Instantaneous target value at `elapsed` since scenario start.
    #[must_use]
    pub fn target_at(&self, elapsed: Duration) -> f64 {
        let mut start = self.initial;
        let mut offset = Duration::ZERO;

        for stage in &self.stages {
            if stage.duration.is_zero() {
                // Instant jump; affects every later instant.
                start = stage.target;
                continue;
            }
            let end_offset = offset + stage.duration;
            if elapsed < end_offset {
                let t = (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
                return start + (stage.target - start) * t;
            }
            start = stage.target;
            offset = end_offset;
        }

        start
    }

    /// Sum of all stage durations.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Maximum value the curve ever reaches.
    #[must_use]
    pub fn peak(&self) -> f64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.initial, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_linear_ramp_up() {
        let rc = RateController::new(0.0, &[Stage::new(secs(10), 100.0)]).unwrap();
        assert_eq!(rc.target_at(secs(0)), 0.0);
        assert_eq!(rc.target_at(secs(5)), 50.0);
        assert_eq!(rc.target_at(secs(10)), 100.0);
    }

    #[test]
    fn test_boundary_continuity() {
        // Value at each boundary must equal both the prior stage's end and
        // the next stage's start.
        let stages = [
            Stage::new(secs(10), 100.0),
            Stage::new(secs(10), 100.0),
            Stage::new(secs(10), 0.0),
        ];
        let rc = RateController::new(0.0, &stages).unwrap();

        let eps = 1e-9;
        let boundary = rc.target_at(secs(10));
        let just_before = rc.target_at(secs(10) - Duration::from_nanos(1));
        let just_after = rc.target_at(secs(10) + Duration::from_nanos(1));
        assert_eq!(boundary, 100.0);
        assert!((just_before - 100.0).abs() < 1e-6);
        assert!((just_after - 100.0).abs() < eps);

        let second_boundary = rc.target_at(secs(20));
        assert_eq!(second_boundary, 100.0);
    }

    #[test]
    fn test_ramp_down_and_hold_after_end() {
        let rc = RateController::new(80.0, &[Stage::new(secs(10), 0.0)]).unwrap();
        assert_eq!(rc.target_at(secs(0)), 80.0);
        assert_eq!(rc.target_at(secs(5)), 40.0);
        assert_eq!(rc.target_at(secs(10)), 0.0);
        assert_eq!(rc.target_at(secs(60)), 0.0);
    }

    #[test]
    fn test_zero_duration_stage_jumps() {
        let stages = [Stage::new(secs(0), 50.0), Stage::new(secs(10), 50.0)];
        let rc = RateController::new(0.0, &stages).unwrap();
        assert_eq!(rc.target_at(secs(0)), 50.0);
        assert_eq!(rc.target_at(secs(9)), 50.0);
    }

    #[test]
    fn test_rejects_unschedulable_curves() {
        assert!(RateController::new(0.0, &[]).is_err());
        assert!(RateController::new(0.0, &[Stage::new(secs(0), 10.0)]).is_err());
        assert!(RateController::new(0.0, &[Stage::new(secs(10), -5.0)]).is_err());
        assert!(RateController::new(-1.0, &[Stage::new(secs(10), 5.0)]).is_err());
    }

    #[test]
    fn test_peak_and_total() {
        let stages = [
            Stage::new(secs(60), 10.0),
            Stage::new(secs(120), 50.0),
            Stage::new(secs(120), 0.0),
        ];
        let rc = RateController::new(0.0, &stages).unwrap();
        assert_eq!(rc.peak(), 50.0);
        assert_eq!(rc.total_duration(), secs(300));
    }
}
