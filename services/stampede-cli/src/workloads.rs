//! Built-in synthetic workloads.
//!
//! Transport-free re-creations of the operator flows this tool is usually
//! pointed at: an auth flow that registers and logs in a synthetic user and
//! caches the session token, and a browse flow that reuses a cached token
//! and wanders the catalog with weighted branches. All branching draws from
//! the iteration's seeded random source, so a fixed `--seed` reproduces a
//! run's behavior exactly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use stampede_engine::{IterationContext, Workload, WorkloadFailure, WorkloadRegistry};

/// Probability that a simulated request errors at the transport level.
const TRANSPORT_ERROR_RATE: f64 = 0.01;

/// Registers every built-in workload. `default` is an alias for `think`.
pub fn register_builtins(registry: &mut WorkloadRegistry) {
    registry.register("noop", Arc::new(Noop));
    registry.register("think", Arc::new(Think::default()));
    registry.register("default", Arc::new(Think::default()));
    registry.register("auth-flow", Arc::new(AuthFlow));
    registry.register("browse-flow", Arc::new(BrowseFlow));
}

/// Succeeds instantly; useful for calibrating the engine itself.
pub struct Noop;

#[async_trait]
impl Workload for Noop {
    async fn call(&self, _ctx: &mut IterationContext) -> Result<(), WorkloadFailure> {
        Ok(())
    }
}

/// Sleeps a seeded uniform think-time window, then succeeds.
pub struct Think {
    min: Duration,
    max: Duration,
}

impl Default for Think {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(500),
            max: Duration::from_millis(1500),
        }
    }
}

#[async_trait]
impl Workload for Think {
    async fn call(&self, ctx: &mut IterationContext) -> Result<(), WorkloadFailure> {
        let window = (self.max - self.min).as_millis() as u64;
        let pause = self.min + Duration::from_millis(ctx.rng().gen_range(0..=window));
        tokio::time::sleep(pause).await;
        Ok(())
    }
}

/// Register a fresh synthetic user, log in, and cache the session token for
/// the browse flow to reuse.
pub struct AuthFlow;

#[async_trait]
impl Workload for AuthFlow {
    async fn call(&self, ctx: &mut IterationContext) -> Result<(), WorkloadFailure> {
        let register_ms = simulate_request(ctx, "registerRequest", 20..=120).await?;
        ctx.add_trend_with("api_latency", register_ms, &[("name", "registerRequest")]);

        let registered = ctx.rng().gen_bool(0.98);
        if !ctx.check("registration successful", registered) {
            ctx.add_counter("failed_requests", 1.0);
            think(ctx, 1000..=3000).await;
            return Ok(());
        }
        ctx.add_counter("successful_registrations", 1.0);

        let login_ms = simulate_request(ctx, "loginRequest", 10..=80).await?;
        ctx.add_trend_with("api_latency", login_ms, &[("name", "loginRequest")]);

        let logged_in = ctx.rng().gen_bool(0.99);
        if !ctx.check("login successful", logged_in) {
            ctx.add_counter("failed_requests", 1.0);
            think(ctx, 1000..=3000).await;
            return Ok(());
        }
        ctx.add_counter("successful_logins", 1.0);

        // Cache the session token so browse iterations can skip the slow
        // path; the pool caps retention and evicts the oldest.
        let token = format!("token-{}-{}", ctx.vu_id(), ctx.iteration());
        ctx.resources().push(token);

        think(ctx, 1000..=3000).await;
        Ok(())
    }
}

/// Browse the catalog with a cached session token: list, sometimes view
/// details (50%), rarely register for an event (10%), often check one's own
/// registrations (40%).
pub struct BrowseFlow;

#[async_trait]
impl Workload for BrowseFlow {
    async fn call(&self, ctx: &mut IterationContext) -> Result<(), WorkloadFailure> {
        let resources = ctx.resources().clone();
        let token = resources.sample(ctx.rng());
        if !ctx.check("token available", token.is_some()) {
            // No credentials cached yet; nothing useful to browse with.
            return Ok(());
        }

        let list_ms = simulate_request(ctx, "getEvents", 30..=150).await?;
        ctx.add_trend_with("api_latency", list_ms, &[("name", "getEvents")]);
        let listed = ctx.rng().gen_bool(0.99);
        if !ctx.check("get events successful", listed) {
            ctx.add_counter("failed_requests", 1.0);
            think(ctx, 2000..=5000).await;
            return Ok(());
        }

        if ctx.rng().gen_bool(0.5) {
            let details_ms = simulate_request(ctx, "getEventDetails", 30..=150).await?;
            ctx.add_trend_with("api_latency", details_ms, &[("name", "getEventDetails")]);
            let detailed = ctx.rng().gen_bool(0.99);
            ctx.check("get event details successful", detailed);

            if ctx.rng().gen_bool(0.1) {
                let register_ms = simulate_request(ctx, "registerEvent", 50..=250).await?;
                ctx.add_trend_with("api_latency", register_ms, &[("name", "registerEvent")]);
                let registered = ctx.rng().gen_bool(0.97);
                if ctx.check("event registration successful", registered) {
                    ctx.add_counter("event_registrations", 1.0);
                } else {
                    ctx.add_counter("failed_requests", 1.0);
                }
            }
        }

        if ctx.rng().gen_bool(0.4) {
            let regs_ms = simulate_request(ctx, "getUserRegistrations", 30..=150).await?;
            ctx.add_trend_with("api_latency", regs_ms, &[("name", "getUserRegistrations")]);
            let listed = ctx.rng().gen_bool(0.99);
            ctx.check("get user registrations successful", listed);
        }

        think(ctx, 2000..=5000).await;
        Ok(())
    }
}

/// Simulates one request: sleeps a seeded latency, occasionally erroring at
/// the transport level. Returns the simulated latency in milliseconds.
async fn simulate_request(
    ctx: &mut IterationContext,
    name: &str,
    latency_ms: std::ops::RangeInclusive<u64>,
) -> Result<f64, WorkloadFailure> {
    let ms = ctx.rng().gen_range(latency_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;

    if ctx.rng().gen_bool(TRANSPORT_ERROR_RATE) {
        ctx.add_counter("failed_requests", 1.0);
        ctx.add_counter("timeout_errors", 1.0);
        return Err(WorkloadFailure::new(format!("{name}: connection timed out")));
    }
    Ok(ms as f64)
}

async fn think(ctx: &mut IterationContext, window_ms: std::ops::RangeInclusive<u64>) {
    let pause = Duration::from_millis(ctx.rng().gen_range(window_ms));
    tokio::time::sleep(pause).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::metrics::builtin;
    use stampede_core::TagSet;
    use stampede_engine::{Invoker, MetricsAggregator, MetricsHandle, SharedPool};
    use tokio::sync::watch;

    fn harness(workload: Arc<dyn Workload>) -> (Invoker, MetricsHandle, SharedPool<String>) {
        let metrics = MetricsAggregator::spawn(256, 0);
        let resources = SharedPool::new(100);
        let invoker = Invoker::new(
            workload,
            Duration::from_secs(60),
            TagSet::new(),
            metrics.clone(),
            resources.clone(),
            1234,
        );
        (invoker, metrics, resources)
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_flow_caches_tokens() {
        let (invoker, metrics, resources) = harness(Arc::new(AuthFlow));
        let (_tx, mut kill) = watch::channel(false);

        for _ in 0..20 {
            invoker.run_iteration(0, &mut kill).await;
        }

        assert!(!resources.is_empty(), "successful logins cache tokens");

        let snapshot = metrics.snapshot().await.unwrap();
        let registrations = snapshot
            .merged("successful_registrations", &TagSet::new())
            .and_then(|m| m.counter_sum())
            .unwrap_or(0.0);
        assert!(registrations >= 1.0);
        assert!(snapshot
            .merged("api_latency", &TagSet::new())
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_browse_flow_without_tokens_short_circuits() {
        let (invoker, metrics, resources) = harness(Arc::new(BrowseFlow));
        let (_tx, mut kill) = watch::channel(false);

        invoker.run_iteration(0, &mut kill).await;

        assert!(resources.is_empty());
        let snapshot = metrics.snapshot().await.unwrap();
        let (passes, total) = snapshot
            .merged(builtin::CHECKS, &TagSet::new())
            .and_then(|m| m.rate_counts())
            .unwrap();
        assert_eq!((passes, total), (0, 1), "token-available check failed once");
        // The flow stopped before touching the catalog.
        assert!(snapshot.merged("api_latency", &TagSet::new()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_browse_flow_reuses_cached_token() {
        let (invoker, metrics, resources) = harness(Arc::new(BrowseFlow));
        let (_tx, mut kill) = watch::channel(false);
        resources.push("token-seed".to_string());

        for _ in 0..10 {
            invoker.run_iteration(0, &mut kill).await;
        }

        let snapshot = metrics.snapshot().await.unwrap();
        assert!(snapshot.merged("api_latency", &TagSet::new()).is_some());
        let iterations = snapshot
            .merged(builtin::ITERATIONS, &TagSet::new())
            .and_then(|m| m.counter_sum())
            .unwrap();
        assert_eq!(iterations, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_reproduces_branching() {
        async fn run_and_snapshot() -> Vec<(String, f64)> {
            let (invoker, metrics, resources) = harness(Arc::new(BrowseFlow));
            resources.push("t".to_string());
            let (_tx, mut kill) = watch::channel(false);
            for _ in 0..15 {
                invoker.run_iteration(0, &mut kill).await;
            }
            let snapshot = metrics.snapshot().await.unwrap();
            snapshot
                .series
                .iter()
                .filter_map(|(k, v)| v.counter_sum().map(|s| (k.name.clone(), s)))
                .collect()
        }

        let first = run_and_snapshot().await;
        let second = run_and_snapshot().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_registry_covers_builtins() {
        let mut registry = WorkloadRegistry::new();
        register_builtins(&mut registry);
        for name in ["noop", "think", "default", "auth-flow", "browse-flow"] {
            assert!(registry.get(name).is_ok(), "missing builtin `{name}`");
        }
        assert!(registry.get("http").is_err());
    }
}
