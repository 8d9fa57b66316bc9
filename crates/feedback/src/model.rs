use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tunegate_core_types::{FeedbackId, InferenceId};
use tunegate_inference_log::{FeedbackRecord, FeedbackTarget, FeedbackTargetKind, FeedbackValue};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Boolean,
    Float,
    Demonstration,
    Comment,
}

impl MetricKind {
    pub fn accepts(&self, value: &FeedbackValue) -> bool {
        matches!(
            (self, value),
            (MetricKind::Boolean, FeedbackValue::Boolean(_))
                | (MetricKind::Float, FeedbackValue::Float(_))
                | (MetricKind::Demonstration, FeedbackValue::Demonstration(_))
                | (MetricKind::Comment, FeedbackValue::Text(_))
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricLevel {
    Inference,
    Episode,
}

impl MetricLevel {
    pub fn target_kind(&self) -> FeedbackTargetKind {
        match self {
            MetricLevel::Inference => FeedbackTargetKind::Inference,
            MetricLevel::Episode => FeedbackTargetKind::Episode,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    pub kind: MetricKind,
    pub level: MetricLevel,
}

impl MetricConfig {
    pub fn new(name: impl Into<String>, kind: MetricKind, level: MetricLevel) -> Self {
        Self {
            name: name.into(),
            kind,
            level,
        }
    }
}

/// Incoming feedback before validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub target: FeedbackTarget,
    pub metric: String,
    pub value: FeedbackValue,
    #[serde(default)]
    pub idempotency_token: Option<String>,
}

impl FeedbackSubmission {
    pub fn new(target: FeedbackTarget, metric: impl Into<String>, value: FeedbackValue) -> Self {
        Self {
            target,
            metric: metric.into(),
            value,
            idempotency_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.idempotency_token = Some(token.into());
        self
    }

    /// `target_id:metric[:token]`
    pub fn idempotency_key(&self) -> String {
        match &self.idempotency_token {
            Some(token) => format!("{}:{}:{}", self.target.id(), self.metric, token),
            None => format!("{}:{}", self.target.id(), self.metric),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackAck {
    pub feedback_id: FeedbackId,
    /// False when the idempotency key had already been seen.
    pub applied: bool,
    /// True when the target inference has not been written yet.
    pub deferred: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    pub function: String,
    pub variant: String,
    pub metric: String,
}

impl AggregateKey {
    pub fn new(
        function: impl Into<String>,
        variant: impl Into<String>,
        metric: impl Into<String>,
    ) -> Self {
        Self {
            function: function.into(),
            variant: variant.into(),
            metric: metric.into(),
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.function, self.variant, self.metric)
    }
}

/// Running sums for one (function, variant, metric).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub count: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl MetricAggregate {
    pub fn record(&mut self, value: f64, ts: DateTime<Utc>) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.last_updated = Some(match self.last_updated {
            Some(prev) if prev > ts => prev,
            _ => ts,
        });
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Sample variance; needs at least two observations.
    pub fn variance(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let n = self.count as f64;
        let var = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        Some(var.max(0.0))
    }

    pub fn std_error(&self) -> Option<f64> {
        self.variance()
            .map(|var| (var / self.count as f64).sqrt())
    }

    /// Samples recorded after `earlier`, a previous reading of the same aggregate.
    pub fn since(&self, earlier: &MetricAggregate) -> MetricAggregate {
        if earlier.count >= self.count {
            return MetricAggregate {
                last_updated: self.last_updated,
                ..MetricAggregate::default()
            };
        }
        MetricAggregate {
            count: self.count - earlier.count,
            sum: self.sum - earlier.sum,
            sum_sq: (self.sum_sq - earlier.sum_sq).max(0.0),
            last_updated: self.last_updated,
        }
    }

    pub fn merge(&mut self, other: &MetricAggregate) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.last_updated = match (self.last_updated, other.last_updated) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Published once per inference a piece of feedback was applied to.
#[derive(Clone, Debug)]
pub struct FeedbackEvent {
    pub record: FeedbackRecord,
    pub inference_id: InferenceId,
    pub function: String,
    pub variant: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub variant: String,
    pub count: u64,
    pub mean: Option<f64>,
    pub std_error: Option<f64>,
}

/// Per-metric, per-variant summary for one function.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionReport {
    pub function: String,
    pub metrics: BTreeMap<String, Vec<VariantSummary>>,
}
