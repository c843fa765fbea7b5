//! Scheduling strategies.
//!
//! Each executor decides *when* iterations start; what an iteration does is
//! the invoker's problem. All three share the same stop sequence: admission
//! of new iterations stops first (scheduled end or run-level stop signal),
//! in-flight iterations get up to the scenario's graceful-stop window to
//! finish, then survivors are force-cancelled and recorded as `cancelled`.

mod arrival_rate;
mod constant;
mod ramping;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use stampede_core::{CoreError, CoreResult, ExecutionPlan, ScenarioSpec, SchedulerConfig};

use crate::invoker::Invoker;
use crate::vu::VuPool;

/// Everything an executor needs to run one scenario.
pub struct ExecutorContext {
    /// Compiled scenario.
    pub spec: Arc<ScenarioSpec>,
    /// Per-scenario iteration boundary.
    pub invoker: Arc<Invoker>,
    /// VU slot pool sized for this scenario's plan.
    pub pool: VuPool,
    /// Tick granularity knobs.
    pub scheduler: SchedulerConfig,
    /// Run-level admission stop (ctrl-c or abort).
    pub stop: watch::Receiver<bool>,
}

/// Runs one scenario to completion under its executor's schedule.
pub async fn run_scenario(ctx: ExecutorContext) -> CoreResult<()> {
    tracing::info!(
        scenario = %ctx.spec.name,
        executor = ctx.spec.plan.kind().as_str(),
        "scenario starting"
    );
    let result = match &ctx.spec.plan {
        ExecutionPlan::ConstantVus { .. } => constant::run(&ctx).await,
        ExecutionPlan::RampingVus { .. } => ramping::run(&ctx).await,
        ExecutionPlan::RampingArrivalRate { .. } => arrival_rate::run(&ctx).await,
    };
    ctx.pool.shutdown();
    tracing::info!(scenario = %ctx.spec.name, "scenario finished");
    result
}

/// Resolves when the run-level stop signal fires; pends forever when the
/// channel closes without one.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|s| *s).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Waits up to `graceful` for the scenario's workers to finish, then fires
/// the kill signal and reaps the survivors (their in-flight iterations are
/// recorded as cancelled by the invoker).
pub(crate) async fn join_graceful(
    mut workers: JoinSet<()>,
    graceful: Duration,
    kill_tx: watch::Sender<bool>,
) {
    let deadline = Instant::now() + graceful;
    loop {
        tokio::select! {
            joined = workers.join_next() => {
                match joined {
                    None => return,
                    Some(Ok(())) => {}
                    Some(Err(e)) => tracing::error!("VU worker panicked: {e}"),
                }
            }
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }

    tracing::warn!("graceful-stop window elapsed, cancelling in-flight iterations");
    let _ = kill_tx.send(true);
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!("VU worker panicked: {e}");
        }
    }
}

/// Error for a scenario handed to an executor that cannot schedule its plan.
pub(crate) fn plan_mismatch(spec: &ScenarioSpec) -> CoreError {
    CoreError::internal(format!(
        "scenario `{}` dispatched to the wrong executor",
        spec.name
    ))
}
