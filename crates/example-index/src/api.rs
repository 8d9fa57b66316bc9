use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::errors::IndexError;
use crate::metrics::IndexMetrics;
use crate::model::{CompactionReport, Example, IndexStats, PartitionKey, ScoredExample};
use crate::partition::Partition;
use crate::similarity::check_embedding;

pub trait ExampleIndex: Send + Sync {
    fn upsert(&self, example: Example) -> Result<(), IndexError>;

    /// Up to `k` nearest examples under one key, by cosine similarity descending with ties
    /// broken by id ascending. Unknown keys yield an empty result.
    fn query(
        &self,
        function: &str,
        variant: &str,
        namespace: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredExample>, IndexError>;
}

pub struct InMemoryExampleIndex {
    cfg: IndexConfig,
    partitions: DashMap<PartitionKey, Arc<Partition>>,
    metrics: IndexMetrics,
}

impl InMemoryExampleIndex {
    pub fn new(cfg: IndexConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            partitions: DashMap::new(),
            metrics: IndexMetrics::default(),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> IndexMetrics {
        self.metrics.clone()
    }

    fn partition(&self, key: &PartitionKey) -> Option<Arc<Partition>> {
        self.partitions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self, key: &PartitionKey) -> usize {
        self.partition(key).map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(|entry| entry.value().len() == 0)
    }

    pub fn keys(&self) -> Vec<PartitionKey> {
        let mut keys = self
            .partitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> IndexStats {
        let partitions = self
            .partitions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect::<Vec<_>>();
        IndexStats {
            partitions: partitions.len(),
            examples: partitions.iter().map(|p| p.len()).sum(),
            segments: partitions.iter().map(|p| p.segment_count()).sum(),
            buffered: partitions.iter().map(|p| p.buffered()).sum(),
        }
    }

    /// Merges each partition's sealed segments into one.
    pub fn compact(&self) -> CompactionReport {
        let partitions = self
            .partitions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect::<Vec<_>>();
        let mut report = CompactionReport::default();
        for (key, partition) in partitions {
            if let Some(outcome) = partition.merge_segments(self.cfg.min_segments_to_compact) {
                debug!(
                    partition = %key,
                    merged = outcome.segments_merged,
                    dropped = outcome.superseded_dropped,
                    "partition compacted"
                );
                report.partitions_compacted += 1;
                report.segments_merged += outcome.segments_merged;
                report.superseded_dropped += outcome.superseded_dropped;
            }
        }
        if report.partitions_compacted > 0 {
            self.metrics.record_compaction();
        }
        report
    }
}

impl ExampleIndex for InMemoryExampleIndex {
    fn upsert(&self, example: Example) -> Result<(), IndexError> {
        if let Err(reason) = check_embedding(&example.embedding) {
            self.metrics.record_rejected();
            return Err(IndexError::InvalidEmbedding(reason));
        }
        let partition = Arc::clone(
            self.partitions
                .entry(example.key.clone())
                .or_insert_with(|| Arc::new(Partition::new(self.cfg.buffer_capacity)))
                .value(),
        );
        let key = example.key.clone();
        match partition.upsert(example) {
            Ok(outcome) => {
                self.metrics.record_upsert(outcome.sealed);
                if outcome.sealed {
                    debug!(partition = %key, "buffer sealed into segment");
                }
                Ok(())
            }
            Err(err) => {
                self.metrics.record_rejected();
                warn!(partition = %key, "example rejected: {err}");
                Err(err)
            }
        }
    }

    fn query(
        &self,
        function: &str,
        variant: &str,
        namespace: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredExample>, IndexError> {
        check_embedding(embedding).map_err(IndexError::InvalidEmbedding)?;
        self.metrics.record_query();
        let key = PartitionKey::new(function, variant, namespace);
        match self.partition(&key) {
            Some(partition) => partition.query(embedding, k),
            None => Ok(Vec::new()),
        }
    }
}
