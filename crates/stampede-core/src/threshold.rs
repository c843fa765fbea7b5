use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::metrics::TagSet;

/// Statistic a threshold expression reads from an aggregated metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Stat {
    /// Counter sum.
    Count,
    /// Rate pass ratio in `[0, 1]`.
    Rate,
    /// Trend mean.
    Avg,
    /// Trend minimum.
    Min,
    /// Trend maximum.
    Max,
    /// Trend median (alias for the 50th percentile).
    Med,
    /// Trend percentile, e.g. `p(95)`.
    Percentile(f64),
}

impl std::fmt::Display for Stat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Percentile(q) => write!(f, "p({q})"),
        }
    }
}

/// Comparison operator of a threshold expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Op {
    /// Returns the operator's source form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    /// Applies the comparison.
    #[must_use]
    pub fn compare(&self, observed: f64, limit: f64) -> bool {
        match self {
            Self::Lt => observed < limit,
            Self::Le => observed <= limit,
            Self::Gt => observed > limit,
            Self::Ge => observed >= limit,
            Self::Eq => observed == limit,
            Self::Ne => observed != limit,
        }
    }
}

/// One declared pass/fail condition, evaluated read-only against an
/// aggregated snapshot at run end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    /// Metric name the threshold reads.
    pub metric: String,
    /// Tag filter from the selector; series must contain all these tags.
    pub tag_filter: TagSet,
    /// Statistic to extract.
    pub stat: Stat,
    /// Comparison operator.
    pub op: Op,
    /// Limit value the statistic is compared against.
    pub limit: f64,
}

impl ThresholdSpec {
    /// Parses a `metric{key:value,...}` selector and a `stat op limit`
    /// expression such as `p(95)<5000`, `count<10000`, or `rate<0.01`.
    pub fn parse(selector: &str, expression: &str) -> CoreResult<Self> {
        let (metric, tag_filter) = parse_selector(selector)?;
        let (stat, op, limit) = parse_expression(expression)?;
        Ok(Self {
            metric,
            tag_filter,
            stat,
            op,
            limit,
        })
    }

    /// Renders the selector back to its document form.
    #[must_use]
    pub fn selector(&self) -> String {
        if self.tag_filter.is_empty() {
            return self.metric.clone();
        }
        let tags = self
            .tag_filter
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{{{tags}}}", self.metric)
    }

    /// Renders the expression back to its document form.
    #[must_use]
    pub fn expression(&self) -> String {
        format!("{}{}{}", self.stat, self.op.as_str(), self.limit)
    }
}

/// Splits `metric{key:value,...}` into a name and a tag filter.
fn parse_selector(selector: &str) -> CoreResult<(String, TagSet)> {
    let selector = selector.trim();
    let Some(brace) = selector.find('{') else {
        if selector.is_empty() {
            return Err(CoreError::threshold(selector, "empty metric name"));
        }
        return Ok((selector.to_string(), TagSet::new()));
    };

    let metric = selector[..brace].trim();
    let rest = &selector[brace + 1..];
    let Some(body) = rest.strip_suffix('}') else {
        return Err(CoreError::threshold(selector, "unterminated tag selector"));
    };
    if metric.is_empty() {
        return Err(CoreError::threshold(selector, "empty metric name"));
    }

    let mut tags = TagSet::new();
    for pair in body.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once(':') else {
            return Err(CoreError::threshold(
                selector,
                format!("tag `{pair}` is not key:value"),
            ));
        };
        tags.insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok((metric.to_string(), tags))
}

/// Parses `stat op limit`, e.g. `p(95)<5000`.
fn parse_expression(expression: &str) -> CoreResult<(Stat, Op, f64)> {
    let expr = expression.trim();

    // Longest operators first so `<=` is not read as `<`.
    let op_pos = ["<=", ">=", "==", "!=", "<", ">"]
        .iter()
        .filter_map(|op| expr.find(op).map(|at| (at, *op)))
        .min_by_key(|(at, _)| *at);
    let Some((at, op_str)) = op_pos else {
        return Err(CoreError::threshold(expr, "missing comparison operator"));
    };

    let op = match op_str {
        "<" => Op::Lt,
        "<=" => Op::Le,
        ">" => Op::Gt,
        ">=" => Op::Ge,
        "==" => Op::Eq,
        _ => Op::Ne,
    };

    let stat = parse_stat(expr[..at].trim()).map_err(|m| CoreError::threshold(expr, m))?;
    let limit: f64 = expr[at + op_str.len()..]
        .trim()
        .parse()
        .map_err(|_| CoreError::threshold(expr, "limit is not a number"))?;

    Ok((stat, op, limit))
}

fn parse_stat(stat: &str) -> Result<Stat, String> {
    match stat {
        "count" => Ok(Stat::Count),
        "rate" => Ok(Stat::Rate),
        "avg" => Ok(Stat::Avg),
        "min" => Ok(Stat::Min),
        "max" => Ok(Stat::Max),
        "med" => Ok(Stat::Med),
        other => {
            let quantile = other
                .strip_prefix("p(")
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| format!("unknown stat `{other}`"))?;
            let q: f64 = quantile
                .parse()
                .map_err(|_| format!("percentile `{quantile}` is not a number"))?;
            if !(0.0..=100.0).contains(&q) {
                return Err(format!("percentile {q} out of range 0..=100"));
            }
            Ok(Stat::Percentile(q))
        }
    }
}
