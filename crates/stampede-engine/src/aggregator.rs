//! Metrics aggregation.
//!
//! Producers (VU iterations) never touch shared aggregate state: each
//! iteration batches its events and sends the batch over a channel. A single
//! aggregator task folds batches into per-series aggregates, so the hot path
//! contends on nothing but an mpsc send. Snapshots flow through the same
//! channel, which makes them consistent by construction: every batch sent
//! before the snapshot request is folded in before the reply.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot};

use stampede_core::{CoreError, CoreResult, MetricEvent, MetricKind, Stat, TagSet};

/// Identifies one aggregated series: a metric name plus its exact tag set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeriesKey {
    pub name: String,
    pub tags: TagSet,
}

/// Running aggregate of one series. Mutated only by the aggregator task.
#[derive(Debug, Clone)]
pub enum AggregatedMetric {
    /// Exact sum of emitted values.
    Counter { sum: f64 },
    /// Exact pass/total tally.
    Rate { passes: u64, total: u64 },
    /// Distribution summary with a bounded reservoir for percentiles.
    Trend(TrendState),
}

impl AggregatedMetric {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter { sum: 0.0 },
            MetricKind::Rate => Self::Rate { passes: 0, total: 0 },
            MetricKind::Trend => Self::Trend(TrendState::default()),
        }
    }

    /// Aggregation discipline of this series.
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    fn observe(&mut self, value: f64, reservoir_size: usize, rng: &mut StdRng) {
        match self {
            Self::Counter { sum } => *sum += value,
            Self::Rate { passes, total } => {
                *total += 1;
                if value != 0.0 {
                    *passes += 1;
                }
            }
            Self::Trend(trend) => trend.observe(value, reservoir_size, rng),
        }
    }

    fn merge_from(&mut self, other: &Self) {
        match (self, other) {
            (Self::Counter { sum }, Self::Counter { sum: other_sum }) => *sum += other_sum,
            (
                Self::Rate { passes, total },
                Self::Rate {
                    passes: op,
                    total: ot,
                },
            ) => {
                *passes += op;
                *total += ot;
            }
            (Self::Trend(trend), Self::Trend(other_trend)) => trend.merge_from(other_trend),
            _ => {}
        }
    }

    /// Counter sum, when this series is a counter.
    #[must_use]
    pub fn counter_sum(&self) -> Option<f64> {
        match self {
            Self::Counter { sum } => Some(*sum),
            _ => None,
        }
    }

    /// Pass ratio in `[0, 1]`, when this series is a rate.
    #[must_use]
    pub fn rate_ratio(&self) -> Option<f64> {
        match self {
            Self::Rate { passes, total } if *total > 0 => Some(*passes as f64 / *total as f64),
            Self::Rate { .. } => None,
            _ => None,
        }
    }

    /// Pass and total tallies, when this series is a rate.
    #[must_use]
    pub fn rate_counts(&self) -> Option<(u64, u64)> {
        match self {
            Self::Rate { passes, total } => Some((*passes, *total)),
            _ => None,
        }
    }

    /// Trend state, when this series is a trend.
    #[must_use]
    pub fn trend(&self) -> Option<&TrendState> {
        match self {
            Self::Trend(trend) => Some(trend),
            _ => None,
        }
    }

    /// Extracts a threshold statistic from this aggregate.
    #[must_use]
    pub fn stat(&self, stat: Stat) -> Option<f64> {
        match stat {
            Stat::Count => self.counter_sum(),
            Stat::Rate => self.rate_ratio(),
            Stat::Avg => self.trend().and_then(TrendState::avg),
            Stat::Min => self.trend().and_then(TrendState::min),
            Stat::Max => self.trend().and_then(TrendState::max),
            Stat::Med => self.trend().and_then(|t| t.percentile(50.0)),
            Stat::Percentile(q) => self.trend().and_then(|t| t.percentile(q)),
        }
    }
}

/// Distribution summary: exact count/sum/min/max plus an Algorithm-R
/// reservoir approximating percentiles without retaining every sample.
#[derive(Debug, Clone, Default)]
pub struct TrendState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    reservoir: Vec<f64>,
}

impl TrendState {
    fn observe(&mut self, value: f64, reservoir_size: usize, rng: &mut StdRng) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;

        if self.reservoir.len() < reservoir_size {
            self.reservoir.push(value);
        } else {
            let slot = rng.gen_range(0..self.count);
            if (slot as usize) < reservoir_size {
                self.reservoir[slot as usize] = value;
            }
        }
    }

    fn merge_from(&mut self, other: &Self) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count += other.count;
        self.sum += other.sum;
        self.reservoir.extend_from_slice(&other.reservoir);
    }

    /// Number of observed samples.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of all observed samples.
    #[must_use]
    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Smallest observed sample.
    #[must_use]
    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    /// Largest observed sample.
    #[must_use]
    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Estimated q-th percentile (0..=100), linearly interpolated over the
    /// reservoir.
    #[must_use]
    pub fn percentile(&self, q: f64) -> Option<f64> {
        if self.reservoir.is_empty() || !(0.0..=100.0).contains(&q) {
            return None;
        }
        let mut sorted = self.reservoir.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let rank = q / 100.0 * (sorted.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        if lower == upper {
            return Some(sorted[lower]);
        }
        let weight = rank - lower as f64;
        Some(sorted[lower] * (1.0 - weight) + sorted[upper] * weight)
    }
}

/// Consistent view of every series at one point in the run.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// All series keyed by name + exact tag set.
    pub series: BTreeMap<SeriesKey, AggregatedMetric>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Merges every series of `metric` whose tags contain all of
    /// `tag_filter`. Returns `None` when nothing matches.
    #[must_use]
    pub fn merged(&self, metric: &str, tag_filter: &TagSet) -> Option<AggregatedMetric> {
        let mut merged: Option<AggregatedMetric> = None;
        for (key, aggregate) in &self.series {
            if key.name != metric {
                continue;
            }
            let matches = tag_filter
                .iter()
                .all(|(k, v)| key.tags.get(k) == Some(v));
            if !matches {
                continue;
            }
            match merged.as_mut() {
                None => merged = Some(aggregate.clone()),
                Some(acc) => acc.merge_from(aggregate),
            }
        }
        merged
    }

    /// Extracts a threshold statistic over the merged view of `metric`.
    #[must_use]
    pub fn stat(&self, metric: &str, tag_filter: &TagSet, stat: Stat) -> Option<f64> {
        self.merged(metric, tag_filter)
            .and_then(|aggregate| aggregate.stat(stat))
    }

    /// All distinct metric names in the snapshot, sorted.
    #[must_use]
    pub fn metric_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.series.keys().map(|k| k.name.as_str()).collect();
        names.dedup();
        names
    }
}

enum AggregatorMsg {
    Batch(Vec<MetricEvent>),
    Snapshot(oneshot::Sender<MetricsSnapshot>),
}

/// Producer-side handle to the aggregator task. Cheap to clone.
#[derive(Clone)]
pub struct MetricsHandle {
    tx: mpsc::UnboundedSender<AggregatorMsg>,
}

impl MetricsHandle {
    /// Records a single event.
    pub fn record(&self, event: MetricEvent) {
        self.record_batch(vec![event]);
    }

    /// Records a batch of events from one iteration. A send after the run
    /// has torn down is silently discarded.
    pub fn record_batch(&self, events: Vec<MetricEvent>) {
        if events.is_empty() {
            return;
        }
        let _ = self.tx.send(AggregatorMsg::Batch(events));
    }

    /// Takes a consistent snapshot: every batch recorded before this call is
    /// folded in before the reply.
    pub async fn snapshot(&self) -> CoreResult<MetricsSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AggregatorMsg::Snapshot(reply_tx))
            .map_err(|_| CoreError::internal("metrics aggregator is gone"))?;
        reply_rx
            .await
            .map_err(|_| CoreError::internal("metrics aggregator dropped snapshot request"))
    }
}

/// The aggregator task. Owns all aggregate state for a run.
pub struct MetricsAggregator;

impl MetricsAggregator {
    /// Spawns the aggregator task and returns the producer handle. The task
    /// exits when every handle clone is dropped.
    #[must_use]
    pub fn spawn(reservoir_size: usize, seed: u64) -> MetricsHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut series: BTreeMap<SeriesKey, AggregatedMetric> = BTreeMap::new();
            let mut rng = StdRng::seed_from_u64(seed);

            while let Some(msg) = rx.recv().await {
                match msg {
                    AggregatorMsg::Batch(events) => {
                        for event in events {
                            fold(&mut series, event, reservoir_size, &mut rng);
                        }
                    }
                    AggregatorMsg::Snapshot(reply) => {
                        let _ = reply.send(MetricsSnapshot {
                            series: series.clone(),
                            taken_at: Utc::now(),
                        });
                    }
                }
            }
        });
        MetricsHandle { tx }
    }
}

fn fold(
    series: &mut BTreeMap<SeriesKey, AggregatedMetric>,
    event: MetricEvent,
    reservoir_size: usize,
    rng: &mut StdRng,
) {
    let key = SeriesKey {
        name: event.name,
        tags: event.tags,
    };
    let aggregate = series
        .entry(key)
        .or_insert_with(|| AggregatedMetric::new(event.kind));
    if aggregate.kind() != event.kind {
        tracing::warn!(
            expected = aggregate.kind().as_str(),
            got = event.kind.as_str(),
            "metric kind mismatch, sample skipped"
        );
        return;
    }
    aggregate.observe(event.value, reservoir_size, rng);
}
