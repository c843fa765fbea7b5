//! Declarative scenario documents.
//!
//! A document is the operator-facing half of the scenario registry: YAML or
//! JSON, one scenario in flat form or several under a `scenarios` map, plus a
//! document-global `thresholds` block. Parsing never spawns anything;
//! `compile` turns the document into immutable [`ScenarioSpec`]s and
//! [`ThresholdSpec`]s, failing fast with a `ConfigError` on any
//! contradiction.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::scenario::{ExecutionPlan, ExecutorKind, ScenarioSpec, Stage};
use crate::threshold::ThresholdSpec;

/// Duration field accepting humantime strings (`"30s"`, `"2m"`), integer
/// seconds, or float seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationField(Duration);

impl DurationField {
    /// Returns the parsed duration.
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        self.0
    }
}

impl From<Duration> for DurationField {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl Serialize for DurationField {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(self.0).to_string())
    }
}

impl<'de> Deserialize<'de> for DurationField {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = DurationField;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a duration string (e.g. \"30s\") or seconds as a number")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(DurationField(Duration::from_secs(v)))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                if v < 0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Ok(DurationField(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative finite number"));
                }
                Ok(DurationField(Duration::from_secs_f64(v)))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                humantime::parse_duration(v)
                    .map(DurationField)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// One stage as written in a document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    /// Segment length.
    pub duration: DurationField,
    /// Target at the end of the segment.
    pub target: f64,
}

/// One scenario as written in a document; all fields optional until compile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioEntry {
    /// Executor kind: `constant-vus`, `ramping-vus`, `ramping-arrival-rate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,

    /// Workload function name; defaults to `default`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,

    /// Scenario-level tags stamped onto every metric event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    // constant-vus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vus: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<DurationField>,

    // ramping-vus
    #[serde(rename = "startVUs", skip_serializing_if = "Option::is_none")]
    pub start_vus: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageEntry>,

    // ramping-arrival-rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_unit: Option<DurationField>,
    #[serde(rename = "preAllocatedVUs", skip_serializing_if = "Option::is_none")]
    pub pre_allocated_vus: Option<u32>,
    #[serde(rename = "maxVUs", skip_serializing_if = "Option::is_none")]
    pub max_vus: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub graceful_stop: Option<DurationField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_timeout: Option<DurationField>,
}

/// Threshold expressions for one metric selector: a single expression or a
/// list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdExprs {
    One(String),
    Many(Vec<String>),
}

impl ThresholdExprs {
    fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Self::One(s) => std::slice::from_ref(s),
            Self::Many(v) => v.as_slice(),
        };
        slice.iter().map(String::as_str)
    }
}

/// A parsed scenario document, before compilation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDocument {
    /// Named scenarios; when empty, the flattened fields below form a single
    /// scenario called `default`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scenarios: BTreeMap<String, ScenarioEntry>,

    /// Flat single-scenario form.
    #[serde(flatten)]
    pub default_scenario: ScenarioEntry,

    /// Document-global thresholds keyed by `metric{tag:value}` selector.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub thresholds: BTreeMap<String, ThresholdExprs>,
}

/// Engine-level defaults applied where a document is silent.
#[derive(Debug, Clone, Copy)]
pub struct CompileDefaults {
    /// Grace period for in-flight iterations after admission stops.
    pub graceful_stop: Duration,
    /// Per-iteration deadline.
    pub iteration_timeout: Duration,
}

impl Default for CompileDefaults {
    fn default() -> Self {
        Self {
            graceful_stop: Duration::from_secs(30),
            iteration_timeout: Duration::from_secs(60),
        }
    }
}

/// Output of compilation: everything a run needs, fully validated.
#[derive(Debug, Clone)]
pub struct CompiledDocument {
    pub scenarios: Vec<ScenarioSpec>,
    pub thresholds: Vec<ThresholdSpec>,
}

impl ScenarioDocument {
    /// Loads a document from a YAML (`.yaml`/`.yml`) or JSON (`.json`) file.
    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(serde_json::from_str(&raw)?),
            _ => Ok(serde_yaml::from_str(&raw)?),
        }
    }

    /// Applies environment overrides to every scenario in the document.
    ///
    /// Overrides run after parsing and before validation, so a nonsensical
    /// override fails the same way a nonsensical document field does.
    pub fn apply_overrides(&mut self, overrides: &EnvOverrides) {
        if self.scenarios.is_empty() {
            overrides.apply(&mut self.default_scenario);
        } else {
            for entry in self.scenarios.values_mut() {
                overrides.apply(entry);
            }
        }
    }

    /// Compiles and validates the document into runnable specs.
    pub fn compile(&self, defaults: &CompileDefaults) -> CoreResult<CompiledDocument> {
        let mut scenarios = Vec::new();
        if self.scenarios.is_empty() {
            scenarios.push(compile_entry("default", &self.default_scenario, defaults)?);
        } else {
            for (name, entry) in &self.scenarios {
                scenarios.push(compile_entry(name, entry, defaults)?);
            }
        }

        let mut thresholds = Vec::new();
        for (selector, exprs) in &self.thresholds {
            for expr in exprs.iter() {
                thresholds.push(ThresholdSpec::parse(selector, expr)?);
            }
        }

        Ok(CompiledDocument {
            scenarios,
            thresholds,
        })
    }
}

fn compile_entry(
    name: &str,
    entry: &ScenarioEntry,
    defaults: &CompileDefaults,
) -> CoreResult<ScenarioSpec> {
    let executor = entry
        .executor
        .as_deref()
        .ok_or_else(|| CoreError::config(format!("scenario `{name}`: missing executor")))?;
    let kind = ExecutorKind::from_str(executor)
        .map_err(|_| CoreError::config(format!("scenario `{name}`: unknown executor `{executor}`")))?;

    let stages: Vec<Stage> = entry
        .stages
        .iter()
        .map(|s| Stage::new(s.duration.as_duration(), s.target))
        .collect();

    let plan = match kind {
        ExecutorKind::ConstantVus => ExecutionPlan::ConstantVus {
            vus: entry.vus.unwrap_or(1),
            duration: entry
                .duration
                .map(DurationField::as_duration)
                .ok_or_else(|| {
                    CoreError::config(format!("scenario `{name}`: constant-vus requires duration"))
                })?,
        },
        ExecutorKind::RampingVus => ExecutionPlan::RampingVus {
            start_vus: entry.start_vus.unwrap_or(1),
            stages,
        },
        ExecutorKind::RampingArrivalRate => {
            let pre_allocated_vus = entry.pre_allocated_vus.ok_or_else(|| {
                CoreError::config(format!(
                    "scenario `{name}`: ramping-arrival-rate requires preAllocatedVUs"
                ))
            })?;
            ExecutionPlan::RampingArrivalRate {
                start_rate: entry.start_rate.unwrap_or(0.0),
                time_unit: entry
                    .time_unit
                    .map(DurationField::as_duration)
                    .unwrap_or(Duration::from_secs(1)),
                pre_allocated_vus,
                max_vus: entry.max_vus.unwrap_or(pre_allocated_vus),
                stages,
            }
        }
    };

    let spec = ScenarioSpec {
        name: name.to_string(),
        exec: entry.exec.clone().unwrap_or_else(|| "default".to_string()),
        tags: entry.tags.clone(),
        graceful_stop: entry
            .graceful_stop
            .map(DurationField::as_duration)
            .unwrap_or(defaults.graceful_stop),
        iteration_timeout: entry
            .iteration_timeout
            .map(DurationField::as_duration)
            .unwrap_or(defaults.iteration_timeout),
        plan,
    };
    spec.validate()?;
    Ok(spec)
}

/// Named environment overrides, applied after document parsing and before
/// validation.
///
/// Recognized variables: `STAMPEDE_VUS`, `STAMPEDE_DURATION`,
/// `STAMPEDE_START_RATE`, `STAMPEDE_PRE_ALLOCATED_VUS`, `STAMPEDE_MAX_VUS`,
/// `STAMPEDE_GRACEFUL_STOP`, and `STAMPEDE_STAGE_TARGET` (rescales every
/// stage target so the curve's peak equals the given value).
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub vus: Option<u32>,
    pub duration: Option<Duration>,
    pub start_rate: Option<f64>,
    pub pre_allocated_vus: Option<u32>,
    pub max_vus: Option<u32>,
    pub graceful_stop: Option<Duration>,
    pub stage_target: Option<f64>,
}

impl EnvOverrides {
    /// Reads overrides from the process environment. Malformed values are
    /// configuration errors; absent variables are simply skipped.
    pub fn from_env() -> CoreResult<Self> {
        Ok(Self {
            vus: read_parsed("STAMPEDE_VUS")?,
            duration: read_duration("STAMPEDE_DURATION")?,
            start_rate: read_parsed("STAMPEDE_START_RATE")?,
            pre_allocated_vus: read_parsed("STAMPEDE_PRE_ALLOCATED_VUS")?,
            max_vus: read_parsed("STAMPEDE_MAX_VUS")?,
            graceful_stop: read_duration("STAMPEDE_GRACEFUL_STOP")?,
            stage_target: read_parsed("STAMPEDE_STAGE_TARGET")?,
        })
    }

    fn apply(&self, entry: &mut ScenarioEntry) {
        if let Some(vus) = self.vus {
            entry.vus = Some(vus);
        }
        if let Some(duration) = self.duration {
            entry.duration = Some(duration.into());
        }
        if let Some(start_rate) = self.start_rate {
            entry.start_rate = Some(start_rate);
        }
        if let Some(pre) = self.pre_allocated_vus {
            entry.pre_allocated_vus = Some(pre);
        }
        if let Some(max) = self.max_vus {
            entry.max_vus = Some(max);
        }
        if let Some(graceful) = self.graceful_stop {
            entry.graceful_stop = Some(graceful.into());
        }
        if let Some(peak) = self.stage_target {
            let current_peak = entry.stages.iter().map(|s| s.target).fold(0.0, f64::max);
            if current_peak > 0.0 {
                let factor = peak / current_peak;
                for stage in &mut entry.stages {
                    stage.target *= factor;
                }
            }
        }
    }
}

fn read_parsed<T: FromStr>(name: &str) -> CoreResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            CoreError::config(format!("environment override {name}=`{raw}` is not valid"))
        }),
        Err(_) => Ok(None),
    }
}

fn read_duration(name: &str) -> CoreResult<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => humantime::parse_duration(&raw).map(Some).map_err(|e| {
            CoreError::config(format!("environment override {name}=`{raw}`: {e}"))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FLAT_DOC: &str = r#"
executor: constant-vus
vus: 5
duration: 90s
exec: health-check
tags:
  type: health
thresholds:
  iteration_duration: p(95)<5000
"#;

    const MULTI_DOC: &str = r#"
scenarios:
  user_auth:
    executor: ramping-arrival-rate
    exec: auth-flow
    startRate: 10
    timeUnit: 1s
    preAllocatedVUs: 100
    maxVUs: 5000
    stages:
      - { duration: 1m, target: 10 }
      - { duration: 2m, target: 50 }
      - { duration: 2m, target: 0 }
    tags:
      type: auth
  browsing:
    executor: ramping-vus
    exec: browse-flow
    startVUs: 1
    stages:
      - { duration: 30s, target: 20 }
      - { duration: 30s, target: 0 }
thresholds:
  failed_requests: count<10000
  "api_latency{name:loginRequest}":
    - p(95)<8000
    - avg<2000
"#;

    #[test]
    fn test_flat_document_compiles_to_default_scenario() {
        let doc: ScenarioDocument = serde_yaml::from_str(FLAT_DOC).unwrap();
        let compiled = doc.compile(&CompileDefaults::default()).unwrap();

        assert_eq!(compiled.scenarios.len(), 1);
        let spec = &compiled.scenarios[0];
        assert_eq!(spec.name, "default");
        assert_eq!(spec.exec, "health-check");
        assert_eq!(spec.tags.get("type").map(String::as_str), Some("health"));
        assert_eq!(
            spec.plan,
            ExecutionPlan::ConstantVus {
                vus: 5,
                duration: Duration::from_secs(90),
            }
        );
        assert_eq!(compiled.thresholds.len(), 1);
    }

    #[test]
    fn test_multi_document_compiles_all_scenarios() {
        let doc: ScenarioDocument = serde_yaml::from_str(MULTI_DOC).unwrap();
        let compiled = doc.compile(&CompileDefaults::default()).unwrap();

        assert_eq!(compiled.scenarios.len(), 2);
        let auth = compiled
            .scenarios
            .iter()
            .find(|s| s.name == "user_auth")
            .unwrap();
        match &auth.plan {
            ExecutionPlan::RampingArrivalRate {
                start_rate,
                pre_allocated_vus,
                max_vus,
                stages,
                ..
            } => {
                assert_eq!(*start_rate, 10.0);
                assert_eq!(*pre_allocated_vus, 100);
                assert_eq!(*max_vus, 5000);
                assert_eq!(stages.len(), 3);
                assert_eq!(stages[0].duration, Duration::from_secs(60));
            }
            other => panic!("unexpected plan: {other:?}"),
        }

        // One selector with two expressions plus one plain selector.
        assert_eq!(compiled.thresholds.len(), 3);
    }

    #[test]
    fn test_duration_field_forms() {
        #[derive(Deserialize)]
        struct Probe {
            d: DurationField,
        }

        let s: Probe = serde_yaml::from_str("d: 2m").unwrap();
        assert_eq!(s.d.as_duration(), Duration::from_secs(120));
        let n: Probe = serde_yaml::from_str("d: 15").unwrap();
        assert_eq!(n.d.as_duration(), Duration::from_secs(15));
        let f: Probe = serde_yaml::from_str("d: 0.5").unwrap();
        assert_eq!(f.d.as_duration(), Duration::from_millis(500));
        assert!(serde_yaml::from_str::<Probe>("d: soon").is_err());
    }

    #[test]
    fn test_missing_executor_fails_fast() {
        let doc: ScenarioDocument = serde_yaml::from_str("vus: 3\nduration: 10s").unwrap();
        let err = doc.compile(&CompileDefaults::default()).unwrap_err();
        assert!(err.is_config(), "unexpected error: {err}");
    }

    #[test]
    fn test_bad_threshold_fails_compile() {
        let doc: ScenarioDocument = serde_yaml::from_str(
            "executor: constant-vus\nvus: 1\nduration: 1s\nthresholds:\n  x: nonsense",
        )
        .unwrap();
        assert!(doc.compile(&CompileDefaults::default()).is_err());
    }

    #[test]
    fn test_env_overrides_apply_before_validation() {
        let mut doc: ScenarioDocument = serde_yaml::from_str(FLAT_DOC).unwrap();
        let overrides = EnvOverrides {
            vus: Some(50),
            duration: Some(Duration::from_secs(10)),
            ..EnvOverrides::default()
        };
        doc.apply_overrides(&overrides);

        let compiled = doc.compile(&CompileDefaults::default()).unwrap();
        assert_eq!(
            compiled.scenarios[0].plan,
            ExecutionPlan::ConstantVus {
                vus: 50,
                duration: Duration::from_secs(10),
            }
        );
    }

    #[test]
    fn test_stage_target_override_rescales_peak() {
        let mut doc: ScenarioDocument = serde_yaml::from_str(MULTI_DOC).unwrap();
        doc.apply_overrides(&EnvOverrides {
            stage_target: Some(100.0),
            ..EnvOverrides::default()
        });

        let compiled = doc.compile(&CompileDefaults::default()).unwrap();
        let auth = compiled
            .scenarios
            .iter()
            .find(|s| s.name == "user_auth")
            .unwrap();
        match &auth.plan {
            ExecutionPlan::RampingArrivalRate { stages, .. } => {
                // Peak was 50; doubled to 100, other stages scale with it.
                assert_eq!(stages[0].target, 20.0);
                assert_eq!(stages[1].target, 100.0);
                assert_eq!(stages[2].target, 0.0);
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn test_from_path_json_and_yaml() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        yaml.write_all(FLAT_DOC.as_bytes()).unwrap();
        let doc = ScenarioDocument::from_path(yaml.path()).unwrap();
        assert_eq!(doc.default_scenario.vus, Some(5));

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        json.write_all(br#"{"executor":"constant-vus","vus":2,"duration":"5s"}"#)
            .unwrap();
        let doc = ScenarioDocument::from_path(json.path()).unwrap();
        assert_eq!(doc.default_scenario.vus, Some(2));
    }
}
