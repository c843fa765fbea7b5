//! Workload invocation boundary.
//!
//! The invoker runs one opaque workload call per iteration inside a failure
//! and timeout boundary. Whatever the workload does (return an error, blow
//! its deadline, get force-cancelled), the outcome is absorbed and recorded
//! as metrics; nothing propagates upward, so engine liveness never depends
//! on workload behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use stampede_core::metrics::builtin;
use stampede_core::{MetricEvent, TagSet};

use crate::aggregator::MetricsHandle;
use crate::shared_pool::SharedPool;

/// Failure reported by a workload call. Recorded, never propagated.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct WorkloadFailure(pub String);

impl WorkloadFailure {
    /// Creates a failure with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// An opaque, operator-supplied workload function, invoked once per
/// iteration. Implementations must not be assumed idempotent or
/// side-effect-free.
#[async_trait]
pub trait Workload: Send + Sync {
    /// Runs one iteration. Emit sub-results through the context; return
    /// `Err` to record the iteration as failed.
    async fn call(&self, ctx: &mut IterationContext) -> Result<(), WorkloadFailure>;
}

/// Terminal state of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Workload returned `Ok`.
    Success,
    /// Workload returned `Err`.
    Failure,
    /// Workload exceeded the per-iteration deadline.
    Timeout,
    /// Iteration was force-cancelled after the graceful-stop window.
    Cancelled,
}

impl IterationOutcome {
    /// Returns the canonical lowercase name used as the `status` tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Engine-provided context handed to each workload call.
pub struct IterationContext {
    vu_id: u32,
    iteration: u64,
    deadline: Instant,
    rng: StdRng,
    resources: SharedPool<String>,
    base_tags: TagSet,
    events: Vec<MetricEvent>,
}

impl IterationContext {
    /// Identity of the VU slot running this iteration.
    #[must_use]
    pub fn vu_id(&self) -> u32 {
        self.vu_id
    }

    /// Run-unique iteration sequence number within the scenario.
    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Deadline after which the invoker cancels this iteration.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Seeded random source; identical seeds reproduce identical branching.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Run-wide shared resource pool (e.g. cached session tokens).
    #[must_use]
    pub fn resources(&self) -> &SharedPool<String> {
        &self.resources
    }

    /// Records a counter increment tagged with the scenario's tags.
    pub fn add_counter(&mut self, name: impl Into<String>, value: f64) {
        let tags = self.base_tags.clone();
        self.events.push(MetricEvent::counter(name, value, tags));
    }

    /// Records a trend sample tagged with the scenario's tags.
    pub fn add_trend(&mut self, name: impl Into<String>, value: f64) {
        let tags = self.base_tags.clone();
        self.events.push(MetricEvent::trend(name, value, tags));
    }

    /// Records a trend sample with additional tags (e.g. a request name).
    pub fn add_trend_with(
        &mut self,
        name: impl Into<String>,
        value: f64,
        extra: &[(&str, &str)],
    ) {
        let mut tags = self.base_tags.clone();
        for (k, v) in extra {
            tags.insert((*k).to_string(), (*v).to_string());
        }
        self.events.push(MetricEvent::trend(name, value, tags));
    }

    /// Records a rate sample tagged with the scenario's tags.
    pub fn add_rate(&mut self, name: impl Into<String>, pass: bool) {
        let tags = self.base_tags.clone();
        self.events.push(MetricEvent::rate(name, pass, tags));
    }

    /// Records a named boolean check as a `checks` rate sample and returns
    /// the verdict, so call sites can branch on it.
    pub fn check(&mut self, name: &str, pass: bool) -> bool {
        let mut tags = self.base_tags.clone();
        tags.insert(builtin::CHECK_TAG.to_string(), name.to_string());
        self.events
            .push(MetricEvent::rate(builtin::CHECKS, pass, tags));
        pass
    }

    fn into_events(self) -> Vec<MetricEvent> {
        self.events
    }
}

/// Runs workload calls under the per-iteration failure/timeout boundary and
/// reports outcomes to the metrics aggregator.
pub struct Invoker {
    workload: Arc<dyn Workload>,
    timeout: Duration,
    base_tags: TagSet,
    metrics: MetricsHandle,
    resources: SharedPool<String>,
    seed: u64,
    iteration_counter: AtomicU64,
}

impl Invoker {
    /// Creates an invoker for one scenario.
    #[must_use]
    pub fn new(
        workload: Arc<dyn Workload>,
        timeout: Duration,
        base_tags: TagSet,
        metrics: MetricsHandle,
        resources: SharedPool<String>,
        seed: u64,
    ) -> Self {
        Self {
            workload,
            timeout,
            base_tags,
            metrics,
            resources,
            seed,
            iteration_counter: AtomicU64::new(0),
        }
    }

    /// Runs exactly one iteration on the given VU slot and returns its
    /// terminal state. Emits one iteration-completed record plus whatever
    /// events the workload produced; absorbs every failure mode.
    pub async fn run_iteration(
        &self,
        vu_id: u32,
        kill: &mut watch::Receiver<bool>,
    ) -> IterationOutcome {
        let iteration = self.iteration_counter.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let mut ctx = IterationContext {
            vu_id,
            iteration,
            deadline: started + self.timeout,
            rng: StdRng::seed_from_u64(iteration_seed(self.seed, vu_id, iteration)),
            resources: self.resources.clone(),
            base_tags: self.base_tags.clone(),
            events: Vec::new(),
        };

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.timeout, self.workload.call(&mut ctx)) => {
                match result {
                    Ok(Ok(())) => IterationOutcome::Success,
                    Ok(Err(failure)) => {
                        tracing::debug!(vu_id, iteration, %failure, "workload failed");
                        IterationOutcome::Failure
                    }
                    Err(_) => {
                        tracing::debug!(vu_id, iteration, "iteration deadline exceeded");
                        IterationOutcome::Timeout
                    }
                }
            }
            _ = async {
                // A closed channel means no kill can ever arrive; park
                // forever instead of misreading it as a cancellation.
                if kill.wait_for(|killed| *killed).await.is_err() {
                    std::future::pending::<()>().await;
                }
            } => IterationOutcome::Cancelled,
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut events = ctx.into_events();

        let mut status_tags = self.base_tags.clone();
        status_tags.insert(
            builtin::STATUS_TAG.to_string(),
            outcome.as_str().to_string(),
        );
        events.push(MetricEvent::counter(builtin::ITERATIONS, 1.0, status_tags));
        events.push(MetricEvent::trend(
            builtin::ITERATION_DURATION,
            elapsed_ms,
            self.base_tags.clone(),
        ));
        match outcome {
            IterationOutcome::Failure => {
                events.push(MetricEvent::counter(
                    builtin::ITERATIONS_FAILED,
                    1.0,
                    self.base_tags.clone(),
                ));
            }
            IterationOutcome::Timeout => {
                events.push(MetricEvent::counter(
                    builtin::ITERATIONS_TIMED_OUT,
                    1.0,
                    self.base_tags.clone(),
                ));
            }
            IterationOutcome::Cancelled => {
                events.push(MetricEvent::counter(
                    builtin::ITERATIONS_CANCELLED,
                    1.0,
                    self.base_tags.clone(),
                ));
            }
            IterationOutcome::Success => {}
        }

        self.metrics.record_batch(events);
        outcome
    }

    /// Counts arrival-rate starts refused because no VU slot was available.
    pub fn record_dropped(&self, count: u64) {
        self.metrics.record(MetricEvent::counter(
            builtin::DROPPED_ITERATIONS,
            count as f64,
            self.base_tags.clone(),
        ));
    }
}

fn iteration_seed(base: u64, vu_id: u32, iteration: u64) -> u64 {
    base ^ (u64::from(vu_id)).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ iteration.wrapping_mul(0xD1B5_4A32_D192_ED03)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsAggregator;
    use stampede_core::MetricKind;

    struct Always(Result<(), &'static str>);

    #[async_trait]
    impl Workload for Always {
        async fn call(&self, _ctx: &mut IterationContext) -> Result<(), WorkloadFailure> {
            self.0.map_err(WorkloadFailure::new)
        }
    }

    struct Sleeper(Duration);

    #[async_trait]
    impl Workload for Sleeper {
        async fn call(&self, _ctx: &mut IterationContext) -> Result<(), WorkloadFailure> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    fn invoker_with(workload: Arc<dyn Workload>, timeout: Duration) -> (Invoker, MetricsHandle) {
        let metrics = MetricsAggregator::spawn(256, 0);
        let invoker = Invoker::new(
            workload,
            timeout,
            TagSet::new(),
            metrics.clone(),
            SharedPool::new(8),
            42,
        );
        (invoker, metrics)
    }

    #[tokio::test]
    async fn test_success_and_failure_are_classified() {
        let (ok_invoker, metrics) = invoker_with(Arc::new(Always(Ok(()))), Duration::from_secs(5));
        let (_tx, kill_rx) = watch::channel(false);

        let mut kill = kill_rx.clone();
        assert_eq!(
            ok_invoker.run_iteration(0, &mut kill).await,
            IterationOutcome::Success
        );

        let fail_invoker = Invoker::new(
            Arc::new(Always(Err("boom"))),
            Duration::from_secs(5),
            TagSet::new(),
            metrics.clone(),
            SharedPool::new(8),
            42,
        );
        assert_eq!(
            fail_invoker.run_iteration(0, &mut kill).await,
            IterationOutcome::Failure
        );

        let snapshot = metrics.snapshot().await.unwrap();
        let failed = snapshot
            .merged(builtin::ITERATIONS_FAILED, &TagSet::new())
            .unwrap();
        assert_eq!(failed.kind(), MetricKind::Counter);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct_from_failure() {
        let (invoker, metrics) =
            invoker_with(Arc::new(Sleeper(Duration::from_secs(10))), Duration::from_secs(1));
        let (_tx, mut kill) = watch::channel(false);

        let outcome = invoker.run_iteration(3, &mut kill).await;
        assert_eq!(outcome, IterationOutcome::Timeout);

        let snapshot = metrics.snapshot().await.unwrap();
        assert!(snapshot
            .merged(builtin::ITERATIONS_TIMED_OUT, &TagSet::new())
            .is_some());
        assert!(snapshot
            .merged(builtin::ITERATIONS_FAILED, &TagSet::new())
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_signal_cancels_in_flight_iteration() {
        let (invoker, metrics) =
            invoker_with(Arc::new(Sleeper(Duration::from_secs(60))), Duration::from_secs(120));
        let (kill_tx, mut kill) = watch::channel(false);

        let run = invoker.run_iteration(0, &mut kill);
        tokio::pin!(run);

        // Let the iteration start, then pull the plug.
        tokio::select! {
            _ = &mut run => panic!("iteration finished before kill"),
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
        kill_tx.send(true).unwrap();
        assert_eq!(run.await, IterationOutcome::Cancelled);

        let snapshot = metrics.snapshot().await.unwrap();
        assert!(snapshot
            .merged(builtin::ITERATIONS_CANCELLED, &TagSet::new())
            .is_some());
    }

    #[tokio::test]
    async fn test_exactly_one_iteration_record_per_invocation() {
        let (invoker, metrics) = invoker_with(Arc::new(Always(Ok(()))), Duration::from_secs(5));
        let (_tx, mut kill) = watch::channel(false);

        for _ in 0..7 {
            invoker.run_iteration(0, &mut kill).await;
        }

        let snapshot = metrics.snapshot().await.unwrap();
        let iterations = snapshot
            .merged(builtin::ITERATIONS, &TagSet::new())
            .unwrap();
        assert_eq!(iterations.counter_sum(), Some(7.0));
    }

    #[test]
    fn test_iteration_seed_is_stable_and_distinct() {
        let a = iteration_seed(1, 2, 3);
        assert_eq!(a, iteration_seed(1, 2, 3));
        assert_ne!(a, iteration_seed(1, 2, 4));
        assert_ne!(a, iteration_seed(1, 3, 3));
    }
}
