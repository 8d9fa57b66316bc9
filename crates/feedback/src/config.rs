use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{MetricConfig, MetricKind, MetricLevel};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub metrics: Vec<MetricConfig>,
    /// Feedback held for inferences not yet written. Beyond this, submissions are refused.
    pub pending_capacity: usize,
    /// How long parked feedback waits for its inference before it is dropped.
    pub pending_ttl_secs: u64,
    /// Buffered applied-feedback events per subscriber.
    pub event_buffer: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            metrics: default_metrics(),
            pending_capacity: 10_000,
            pending_ttl_secs: 3_600,
            event_buffer: 1_024,
        }
    }
}

impl FeedbackConfig {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

fn default_metrics() -> Vec<MetricConfig> {
    vec![
        MetricConfig::new("intent_accuracy", MetricKind::Boolean, MetricLevel::Inference),
        MetricConfig::new("response_relevance", MetricKind::Float, MetricLevel::Inference),
        MetricConfig::new("resolution_potential", MetricKind::Float, MetricLevel::Inference),
        MetricConfig::new("customer_satisfaction", MetricKind::Float, MetricLevel::Episode),
        MetricConfig::new("demonstration", MetricKind::Demonstration, MetricLevel::Inference),
        MetricConfig::new("comment", MetricKind::Comment, MetricLevel::Inference),
    ]
}
