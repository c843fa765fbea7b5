//! Run orchestration.
//!
//! The runner compiles a scenario document, resolves workload functions,
//! then runs every scenario concurrently against one shared metrics
//! aggregator and resource pool; a document declaring several scenarios
//! side by side expects them to run together. At the end it evaluates
//! thresholds and produces the run summary.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use uuid::Uuid;

use stampede_core::metrics::builtin;
use stampede_core::{
    CompiledDocument, CoreError, CoreResult, EngineConfig, ExecutionPlan, ScenarioDocument,
};

use crate::aggregator::MetricsAggregator;
use crate::executor::{run_scenario, ExecutorContext};
use crate::invoker::{Invoker, Workload};
use crate::shared_pool::SharedPool;
use crate::summary::{evaluate_thresholds, RunSummary};
use crate::vu::VuPool;

/// Maps `exec` names from scenario documents to workload implementations.
#[derive(Default)]
pub struct WorkloadRegistry {
    workloads: HashMap<String, Arc<dyn Workload>>,
}

impl WorkloadRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workload under a name; later registrations win.
    pub fn register(&mut self, name: impl Into<String>, workload: Arc<dyn Workload>) {
        self.workloads.insert(name.into(), workload);
    }

    /// Resolves a workload, failing fast with `UnknownWorkload`.
    pub fn get(&self, name: &str) -> CoreResult<Arc<dyn Workload>> {
        self.workloads
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::unknown_workload(name))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workloads.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Drives one run of a scenario document end to end.
pub struct Runner {
    config: EngineConfig,
    registry: WorkloadRegistry,
    seed: u64,
    handle_signals: bool,
}

impl Runner {
    /// Creates a runner with an OS-random seed.
    #[must_use]
    pub fn new(config: EngineConfig, registry: WorkloadRegistry) -> Self {
        Self {
            config,
            registry,
            seed: rand::random(),
            handle_signals: true,
        }
    }

    /// Fixes the run seed so workload branching and pool sampling reproduce.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Disables the ctrl-c listener (used by embedding tests).
    #[must_use]
    pub fn without_signal_handler(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Compiles and runs the document; returns the final summary. Only
    /// configuration-class errors abort; workload failures surface solely as
    /// metrics and threshold verdicts.
    pub async fn run(&self, document: &ScenarioDocument) -> CoreResult<RunSummary> {
        let CompiledDocument {
            scenarios,
            thresholds,
        } = document.compile(&self.config.compile_defaults())?;

        // Resolve every workload before spawning anything.
        let mut workloads = Vec::with_capacity(scenarios.len());
        for spec in &scenarios {
            workloads.push(self.registry.get(&spec.exec)?);
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let metrics = MetricsAggregator::spawn(self.config.metrics.reservoir_size, self.seed);
        let resources: SharedPool<String> = SharedPool::new(self.config.resources.capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        if self.handle_signals {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, stopping admission");
                    let _ = stop_tx.send(true);
                }
            });
        } else {
            // Keep the stop channel alive for the whole run.
            tokio::spawn(async move {
                stop_tx.closed().await;
            });
        }

        tracing::info!(%run_id, scenarios = scenarios.len(), "run starting");

        let mut handles = Vec::with_capacity(scenarios.len());
        for (index, (spec, workload)) in scenarios.into_iter().zip(workloads).enumerate() {
            let spec = Arc::new(spec);
            let pool = match &spec.plan {
                ExecutionPlan::ConstantVus { vus, .. } => VuPool::new(*vus, *vus),
                ExecutionPlan::RampingVus { start_vus, .. } => {
                    VuPool::new(*start_vus, spec.plan.max_concurrency())
                }
                ExecutionPlan::RampingArrivalRate {
                    pre_allocated_vus,
                    max_vus,
                    ..
                } => VuPool::new(*pre_allocated_vus, *max_vus),
            };

            let mut base_tags = spec.tags.clone();
            base_tags.insert(builtin::SCENARIO_TAG.to_string(), spec.name.clone());
            let invoker = Arc::new(Invoker::new(
                workload,
                spec.iteration_timeout,
                base_tags,
                metrics.clone(),
                resources.clone(),
                self.seed.wrapping_add(index as u64),
            ));

            let ctx = ExecutorContext {
                spec,
                invoker,
                pool,
                scheduler: self.config.scheduler.clone(),
                stop: stop_rx.clone(),
            };
            handles.push(tokio::spawn(run_scenario(ctx)));
        }

        for joined in join_all(handles).await {
            joined.map_err(|e| CoreError::internal(format!("scenario task panicked: {e}")))??;
        }

        let snapshot = metrics.snapshot().await?;
        let finished_at = Utc::now();
        let thresholds = evaluate_thresholds(&thresholds, &snapshot);
        let passed = thresholds.iter().all(|v| v.passed);
        if passed {
            tracing::info!(%run_id, "run finished, all thresholds passed");
        } else {
            tracing::warn!(%run_id, "run finished with threshold breaches");
        }

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at,
            snapshot,
            thresholds,
            passed,
        })
    }
}
