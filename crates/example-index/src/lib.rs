//! Example index: per (function, variant, namespace) partitions of embeddings, each a small
//! locked write buffer in front of immutable sealed segments.

pub mod api;
pub mod compactor;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod model;
mod partition;
mod similarity;

pub use api::{ExampleIndex, InMemoryExampleIndex};
pub use compactor::spawn_compactor;
pub use config::IndexConfig;
pub use errors::IndexError;
pub use metrics::{IndexMetricSnapshot, IndexMetrics};
pub use model::{CompactionReport, Example, IndexStats, PartitionKey, ScoredExample};
