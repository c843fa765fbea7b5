//! Run summaries, threshold verdicts, and metric export.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use stampede_core::{CoreResult, MetricKind, Stat, TagSet, ThresholdSpec};

use crate::aggregator::MetricsSnapshot;

/// Outcome of one threshold evaluated against the final snapshot.
#[derive(Debug, Clone)]
pub struct ThresholdVerdict {
    /// The declared threshold.
    pub spec: ThresholdSpec,
    /// The statistic actually observed, when it existed.
    pub observed: Option<f64>,
    /// Whether the comparison held.
    pub passed: bool,
}

/// Evaluates every threshold independently; a failing one marks the run
/// failed without affecting the others or the collected metrics.
///
/// Missing data resolves by statistic: `count` and `rate` read as zero (no
/// events means nothing failed), while trend statistics over no samples fail
/// the threshold, since a latency expectation that never measured anything
/// should not silently pass.
#[must_use]
pub fn evaluate_thresholds(
    specs: &[ThresholdSpec],
    snapshot: &MetricsSnapshot,
) -> Vec<ThresholdVerdict> {
    specs
        .iter()
        .map(|spec| {
            let observed = snapshot.stat(&spec.metric, &spec.tag_filter, spec.stat);
            let passed = match (observed, spec.stat) {
                (Some(value), _) => spec.op.compare(value, spec.limit),
                (None, Stat::Count | Stat::Rate) => spec.op.compare(0.0, spec.limit),
                (None, _) => false,
            };
            ThresholdVerdict {
                spec: spec.clone(),
                observed,
                passed,
            }
        })
        .collect()
}

/// One exported snapshot tuple: name, kind, value, tags. Trend series export
/// one row per statistic, with the statistic recorded under the `stat` tag.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRow {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub tags: TagSet,
}

/// Destination for exported snapshot rows. The sink's own protocol (file,
/// socket, collector) is outside the engine's concern.
pub trait MetricsSink: Send {
    /// Delivers the final snapshot rows.
    fn emit(&mut self, rows: &[MetricRow]) -> CoreResult<()>;
}

/// Sink writing one JSON object per row, newline-delimited.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wraps a writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl JsonLinesSink<std::fs::File> {
    /// Creates (or truncates) a file-backed sink.
    pub fn create(path: impl AsRef<std::path::Path>) -> CoreResult<Self> {
        Ok(Self::new(std::fs::File::create(path)?))
    }
}

impl<W: Write + Send> MetricsSink for JsonLinesSink<W> {
    fn emit(&mut self, rows: &[MetricRow]) -> CoreResult<()> {
        for row in rows {
            let line = serde_json::to_string(row)?;
            writeln!(self.writer, "{line}")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Everything a finished run reports.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished (including graceful stop).
    pub finished_at: DateTime<Utc>,
    /// Final consistent snapshot of every series.
    pub snapshot: MetricsSnapshot,
    /// One verdict per declared threshold.
    pub thresholds: Vec<ThresholdVerdict>,
    /// True when every threshold passed.
    pub passed: bool,
}

const TREND_EXPORT_STATS: &[(&str, Stat)] = &[
    ("avg", Stat::Avg),
    ("min", Stat::Min),
    ("med", Stat::Med),
    ("max", Stat::Max),
    ("p(90)", Stat::Percentile(90.0)),
    ("p(95)", Stat::Percentile(95.0)),
    ("p(99)", Stat::Percentile(99.0)),
];

impl RunSummary {
    /// Flattens the snapshot into exportable rows.
    #[must_use]
    pub fn export_rows(&self) -> Vec<MetricRow> {
        let mut rows = Vec::new();
        for (key, aggregate) in &self.snapshot.series {
            match aggregate.kind() {
                MetricKind::Counter => rows.push(MetricRow {
                    name: key.name.clone(),
                    kind: MetricKind::Counter,
                    value: aggregate.counter_sum().unwrap_or(0.0),
                    tags: key.tags.clone(),
                }),
                MetricKind::Rate => rows.push(MetricRow {
                    name: key.name.clone(),
                    kind: MetricKind::Rate,
                    value: aggregate.rate_ratio().unwrap_or(0.0),
                    tags: key.tags.clone(),
                }),
                MetricKind::Trend => {
                    for (label, stat) in TREND_EXPORT_STATS {
                        if let Some(value) = aggregate.stat(*stat) {
                            let mut tags = key.tags.clone();
                            tags.insert("stat".to_string(), (*label).to_string());
                            rows.push(MetricRow {
                                name: key.name.clone(),
                                kind: MetricKind::Trend,
                                value,
                                tags,
                            });
                        }
                    }
                }
            }
        }
        rows
    }

    /// Renders the human-readable end-of-run report.
    #[must_use]
    pub fn render_text(&self) -> String {
        let names = self.snapshot.metric_names();
        let width = names.iter().map(|n| n.len()).max().unwrap_or(0).max(18);
        let mut out = String::new();

        for name in names {
            let Some(aggregate) = self.snapshot.merged(name, &TagSet::new()) else {
                continue;
            };
            let dots = ".".repeat(width - name.len() + 3);
            let line = match aggregate.kind() {
                MetricKind::Counter => {
                    format!("{}", aggregate.counter_sum().unwrap_or(0.0))
                }
                MetricKind::Rate => {
                    let (passes, total) = aggregate.rate_counts().unwrap_or((0, 0));
                    let ratio = aggregate.rate_ratio().unwrap_or(0.0);
                    format!("{:.2}% \u{2713} {passes} \u{2717} {}", ratio * 100.0, total - passes)
                }
                MetricKind::Trend => {
                    let stat = |s| aggregate.stat(s).unwrap_or(0.0);
                    format!(
                        "avg={:.2} min={:.2} med={:.2} max={:.2} p(90)={:.2} p(95)={:.2}",
                        stat(Stat::Avg),
                        stat(Stat::Min),
                        stat(Stat::Med),
                        stat(Stat::Max),
                        stat(Stat::Percentile(90.0)),
                        stat(Stat::Percentile(95.0)),
                    )
                }
            };
            out.push_str(&format!("  {name}{dots}: {line}\n"));
        }

        if !self.thresholds.is_empty() {
            out.push('\n');
            for verdict in &self.thresholds {
                let mark = if verdict.passed { "\u{2705}" } else { "\u{274c}" };
                let observed = verdict
                    .observed
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| "no data".to_string());
                out.push_str(&format!(
                    "  {mark} {}: {} (observed {observed})\n",
                    verdict.spec.selector(),
                    verdict.spec.expression(),
                ));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsAggregator;
    use stampede_core::MetricEvent;

    async fn snapshot_with_counter(name: &str, count: u64) -> MetricsSnapshot {
        let handle = MetricsAggregator::spawn(64, 0);
        for _ in 0..count {
            handle.record(MetricEvent::counter(name, 1.0, TagSet::new()));
        }
        handle.snapshot().await.unwrap()
    }

    #[tokio::test]
    async fn test_count_threshold_breach_and_pass() {
        let spec = ThresholdSpec::parse("failed_requests", "count<10").unwrap();

        let breached = snapshot_with_counter("failed_requests", 12).await;
        let verdicts = evaluate_thresholds(std::slice::from_ref(&spec), &breached);
        assert!(!verdicts[0].passed);
        assert_eq!(verdicts[0].observed, Some(12.0));

        let fine = snapshot_with_counter("failed_requests", 5).await;
        let verdicts = evaluate_thresholds(std::slice::from_ref(&spec), &fine);
        assert!(verdicts[0].passed);
    }

    #[tokio::test]
    async fn test_missing_counter_reads_zero_missing_trend_fails() {
        let handle = MetricsAggregator::spawn(64, 0);
        let snapshot = handle.snapshot().await.unwrap();

        let count_spec = ThresholdSpec::parse("absent", "count<10").unwrap();
        let trend_spec = ThresholdSpec::parse("absent", "p(95)<100").unwrap();
        let verdicts = evaluate_thresholds(&[count_spec, trend_spec], &snapshot);
        assert!(verdicts[0].passed, "count over no data is vacuously zero");
        assert!(!verdicts[1].passed, "latency expectation with no data fails");
    }

    #[tokio::test]
    async fn test_export_rows_cover_all_kinds() {
        let handle = MetricsAggregator::spawn(64, 0);
        handle.record(MetricEvent::counter("iterations", 3.0, TagSet::new()));
        handle.record(MetricEvent::rate("checks", true, TagSet::new()));
        handle.record(MetricEvent::trend("latency", 10.0, TagSet::new()));
        let snapshot = handle.snapshot().await.unwrap();

        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            snapshot,
            thresholds: Vec::new(),
            passed: true,
        };

        let rows = summary.export_rows();
        assert!(rows
            .iter()
            .any(|r| r.name == "iterations" && r.kind == MetricKind::Counter && r.value == 3.0));
        assert!(rows
            .iter()
            .any(|r| r.name == "checks" && r.kind == MetricKind::Rate && r.value == 1.0));
        // Trend exports one row per statistic.
        assert!(
            rows.iter()
                .filter(|r| r.name == "latency")
                .all(|r| r.tags.contains_key("stat"))
        );

        let mut buffer = Vec::new();
        JsonLinesSink::new(&mut buffer).emit(&rows).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text.lines().count(), rows.len());
        assert!(text.lines().all(|l| l.starts_with('{')));
    }

    #[tokio::test]
    async fn test_render_text_mentions_thresholds() {
        let snapshot = snapshot_with_counter("failed_requests", 12).await;
        let spec = ThresholdSpec::parse("failed_requests", "count<10").unwrap();
        let thresholds = evaluate_thresholds(std::slice::from_ref(&spec), &snapshot);
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            snapshot,
            thresholds,
            passed: false,
        };

        let text = summary.render_text();
        assert!(text.contains("failed_requests"));
        assert!(text.contains("count<10"));
        assert!(text.contains('\u{274c}'));
    }
}
