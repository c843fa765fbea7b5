//! Ramping-arrival-rate executor (`ramping-arrival-rate`): throughput
//! decoupled from concurrency.
//!
//! A token bucket accrues `target_rate * tick` tokens per tick, carrying the
//! fractional remainder across ticks so integer truncation never skews the
//! long-term rate. Each whole token attempts one iteration start against the
//! VU pool: the pool grows lazily up to `maxVUs` first, and only when it can
//! neither reuse nor grow is the start **dropped** and counted, never
//! queued. Queuing would hide saturation and build unbounded backlog; the
//! drop counter is the signal operators look at.

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use stampede_core::{CoreResult, ExecutionPlan};

use crate::rate::RateController;

use super::{join_graceful, plan_mismatch, stopped, ExecutorContext};

pub(super) async fn run(ctx: &ExecutorContext) -> CoreResult<()> {
    let ExecutionPlan::RampingArrivalRate {
        start_rate,
        time_unit,
        stages,
        ..
    } = &ctx.spec.plan
    else {
        return Err(plan_mismatch(&ctx.spec));
    };

    let controller = RateController::new(*start_rate, stages)?;
    let total = controller.total_duration();
    let per_second = 1.0 / time_unit.as_secs_f64();
    let tick = ctx.scheduler.tick();

    let started = Instant::now();
    let (kill_tx, kill_rx) = watch::channel(false);
    let mut workers: JoinSet<()> = JoinSet::new();
    let mut stop = ctx.stop.clone();
    let mut carry = 0.0_f64;
    let mut next_tick = started + tick;

    loop {
        if *stop.borrow_and_update() {
            tracing::info!(scenario = %ctx.spec.name, "stop signal received, halting admission");
            break;
        }
        let elapsed = started.elapsed();
        if elapsed >= total {
            break;
        }

        // Starts owed this tick, with the sub-token remainder carried over.
        let rate = controller.target_at(elapsed) * per_second;
        let due = rate * tick.as_secs_f64() + carry;
        let starts = due.floor();
        carry = due - starts;

        let mut dropped = 0_u64;
        for _ in 0..starts as u64 {
            match ctx.pool.try_acquire() {
                Some(lease) => {
                    let invoker = ctx.invoker.clone();
                    let mut kill = kill_rx.clone();
                    workers.spawn(async move {
                        invoker.run_iteration(lease.id(), &mut kill).await;
                        drop(lease);
                    });
                }
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            ctx.invoker.record_dropped(dropped);
            tracing::debug!(
                scenario = %ctx.spec.name,
                dropped,
                allocated = ctx.pool.allocated(),
                "VU pool exhausted, dropping starts"
            );
        }

        // Reap finished one-shot iterations so the set stays small.
        while workers.try_join_next().is_some() {}

        tokio::select! {
            _ = tokio::time::sleep_until(next_tick) => {}
            _ = stopped(&mut stop) => {}
        }
        next_tick += tick;
    }
    drop(kill_rx);

    join_graceful(workers, ctx.spec.graceful_stop, kill_tx).await;
    Ok(())
}
