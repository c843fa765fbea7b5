//! Ramping-concurrency executor (`ramping-vus`).
//!
//! Reconciles the live VU count against the rate controller's target at a
//! fixed sampling interval. Scaling up spawns workers that iterate
//! immediately; scaling down flags the excess as draining, so they finish
//! their current iteration and park, never interrupted mid-iteration.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use stampede_core::{CoreResult, ExecutionPlan};

use crate::invoker::Invoker;
use crate::rate::RateController;
use crate::vu::VuLease;

use super::{join_graceful, plan_mismatch, stopped, ExecutorContext};

pub(super) async fn run(ctx: &ExecutorContext) -> CoreResult<()> {
    let ExecutionPlan::RampingVus { start_vus, stages } = &ctx.spec.plan else {
        return Err(plan_mismatch(&ctx.spec));
    };

    let controller = RateController::new(f64::from(*start_vus), stages)?;
    let total = controller.total_duration();
    let started = Instant::now();
    let end = started + total;
    let sample = ctx.scheduler.ramp_sample();

    let (kill_tx, kill_rx) = watch::channel(false);
    let mut workers = JoinSet::new();
    let mut stop = ctx.stop.clone();
    let mut next_sample = started;

    loop {
        if *stop.borrow_and_update() {
            tracing::info!(scenario = %ctx.spec.name, "stop signal received, halting admission");
            break;
        }
        let elapsed = started.elapsed();
        if elapsed >= total {
            break;
        }

        let target = controller.target_at(elapsed).round() as u32;
        let running = ctx.pool.running();
        if target > running {
            for _ in 0..(target - running) {
                let Some(lease) = ctx.pool.try_acquire() else {
                    tracing::debug!(scenario = %ctx.spec.name, target, "pool at capacity");
                    break;
                };
                workers.spawn(worker(
                    lease,
                    ctx.invoker.clone(),
                    end,
                    ctx.stop.clone(),
                    kill_rx.clone(),
                ));
            }
        } else if running > target {
            let marked = ctx.pool.mark_draining(running - target);
            tracing::debug!(scenario = %ctx.spec.name, target, marked, "scaling down");
        }

        next_sample += sample;
        tokio::select! {
            _ = tokio::time::sleep_until(next_sample) => {}
            _ = stopped(&mut stop) => {}
        }
    }
    drop(kill_rx);

    join_graceful(workers, ctx.spec.graceful_stop, kill_tx).await;
    Ok(())
}

async fn worker(
    lease: VuLease,
    invoker: Arc<Invoker>,
    end: Instant,
    mut stop: watch::Receiver<bool>,
    mut kill: watch::Receiver<bool>,
) {
    while Instant::now() < end && !*stop.borrow_and_update() && !lease.is_draining() {
        invoker.run_iteration(lease.id(), &mut kill).await;
        tokio::task::yield_now().await;
    }
    drop(lease);
}
