//! Constant-concurrency executor (`constant-vus`).
//!
//! Spawns a fixed number of VUs at start; each runs iterations back-to-back
//! in a tight loop until the scenario duration elapses.

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use stampede_core::{CoreResult, ExecutionPlan};

use super::{join_graceful, plan_mismatch, stopped, ExecutorContext};

pub(super) async fn run(ctx: &ExecutorContext) -> CoreResult<()> {
    let ExecutionPlan::ConstantVus { vus, duration } = &ctx.spec.plan else {
        return Err(plan_mismatch(&ctx.spec));
    };

    let deadline = Instant::now() + *duration;
    let (kill_tx, kill_rx) = watch::channel(false);
    let mut workers = JoinSet::new();

    for _ in 0..*vus {
        let lease = ctx
            .pool
            .try_acquire()
            .ok_or_else(|| plan_mismatch(&ctx.spec))?;
        let invoker = ctx.invoker.clone();
        let mut stop = ctx.stop.clone();
        let mut kill = kill_rx.clone();

        workers.spawn(async move {
            while Instant::now() < deadline && !*stop.borrow_and_update() {
                invoker.run_iteration(lease.id(), &mut kill).await;
                tokio::task::yield_now().await;
            }
            drop(lease);
        });
    }
    drop(kill_rx);

    let mut stop = ctx.stop.clone();
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => {}
        _ = stopped(&mut stop) => {
            tracing::info!(scenario = %ctx.spec.name, "stop signal received, halting admission");
        }
    }

    join_graceful(workers, ctx.spec.graceful_stop, kill_tx).await;
    Ok(())
}
