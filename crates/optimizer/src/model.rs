use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tunegate_core_types::{JobId, TargetKey};
use tunegate_variant_registry::Variant;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationPhase {
    Idle,
    Evaluating,
    Triggered,
    Running,
    Cooldown,
}

/// When an evaluated aggregate should start an optimization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerPolicy {
    MeanBelow { target: f64 },
    MeanAbove { target: f64 },
    /// The mean rose by less than `min_delta` across the last `window` evaluations.
    NoImprovement { window: usize, min_delta: f64 },
}

impl TriggerPolicy {
    /// `history` holds earlier evaluated means, oldest first, excluding `mean`.
    pub fn fires(&self, mean: f64, history: &VecDeque<f64>) -> bool {
        match self {
            TriggerPolicy::MeanBelow { target } => mean < *target,
            TriggerPolicy::MeanAbove { target } => mean > *target,
            TriggerPolicy::NoImprovement { window, min_delta } => {
                let window = (*window).max(1);
                if history.len() < window {
                    return false;
                }
                match history.get(history.len() - window) {
                    Some(baseline) => mean - baseline < *min_delta,
                    None => false,
                }
            }
        }
    }

    pub fn history_len(&self) -> usize {
        match self {
            TriggerPolicy::NoImprovement { window, .. } => (*window).max(1),
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationTarget {
    pub function: String,
    pub metric: String,
    pub policy: TriggerPolicy,
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
}

fn default_min_samples() -> u64 {
    100
}

impl OptimizationTarget {
    pub fn new(function: impl Into<String>, metric: impl Into<String>, policy: TriggerPolicy) -> Self {
        Self {
            function: function.into(),
            metric: metric.into(),
            policy,
            min_samples: default_min_samples(),
        }
    }

    pub fn with_min_samples(mut self, min_samples: u64) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.function, &self.metric)
    }
}

/// Data range handed to a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingWindow {
    /// End of the previous job's window; `None` for the first job.
    pub since: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
    pub samples: u64,
}

/// What a finished job wants changed in the registry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum JobStatus {
    Running,
    Succeeded(JobResult),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TriggerOutcome {
    Started(JobId),
    /// A job is running or another task is launching one; nothing was done.
    AlreadyRunning,
    CoolingDown,
    StartFailed(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    pub from: OptimizationPhase,
    pub to: OptimizationPhase,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizationState {
    pub key: TargetKey,
    pub phase: OptimizationPhase,
    pub last_transition: DateTime<Utc>,
    pub last_job: Option<JobId>,
    pub last_statistic: Option<f64>,
    pub history: Vec<Transition>,
}
