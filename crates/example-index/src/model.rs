use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tunegate_core_types::ExampleId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub function: String,
    pub variant: String,
    pub namespace: String,
}

impl PartitionKey {
    pub fn new(
        function: impl Into<String>,
        variant: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            function: function.into(),
            variant: variant.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.function, self.variant, self.namespace)
    }
}

/// A stored exemplar. Upserting the same id again supersedes the previous copy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Example {
    pub id: ExampleId,
    pub key: PartitionKey,
    pub embedding: Vec<f32>,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub ts: DateTime<Utc>,
}

impl Example {
    pub fn new(
        key: PartitionKey,
        embedding: Vec<f32>,
        input: serde_json::Value,
        output: serde_json::Value,
    ) -> Self {
        Self {
            id: ExampleId::new(),
            key,
            embedding,
            input,
            output,
            ts: Utc::now(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScoredExample {
    pub example: Arc<Example>,
    pub score: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub partitions: usize,
    pub examples: usize,
    pub segments: usize,
    pub buffered: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub partitions_compacted: usize,
    pub segments_merged: usize,
    pub superseded_dropped: usize,
}
