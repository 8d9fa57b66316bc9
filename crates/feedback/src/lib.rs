pub mod aggregator;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod model;

mod dedupe;
mod pending;

pub use aggregator::FeedbackAggregator;
pub use config::FeedbackConfig;
pub use errors::FeedbackError;
pub use metrics::{FeedbackMetricSnapshot, FeedbackMetrics};
pub use model::{
    AggregateKey, FeedbackAck, FeedbackEvent, FeedbackSubmission, FunctionReport,
    MetricAggregate, MetricConfig, MetricKind, MetricLevel, VariantSummary,
};
