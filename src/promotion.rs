//! Turns positively rated inferences into retrievable examples.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunegate_core_types::ExampleId;
use tunegate_example_index::{Example, ExampleIndex, PartitionKey};
use tunegate_feedback::{FeedbackAggregator, FeedbackEvent};
use tunegate_inference_log::{FeedbackValue, InferenceLog};
use tunegate_variant_registry::VariantRegistry;

use crate::config::PromotionConfig;
use crate::errors::GatewayResult;
use crate::metrics;

pub struct Promoter {
    cfg: PromotionConfig,
    log: Arc<dyn InferenceLog>,
    index: Arc<dyn ExampleIndex>,
    registry: Arc<dyn VariantRegistry>,
    promoted: AtomicU64,
}

impl Promoter {
    pub fn new(
        cfg: PromotionConfig,
        log: Arc<dyn InferenceLog>,
        index: Arc<dyn ExampleIndex>,
        registry: Arc<dyn VariantRegistry>,
    ) -> Self {
        Self {
            cfg,
            log,
            index,
            registry,
            promoted: AtomicU64::new(0),
        }
    }

    pub fn promoted(&self) -> u64 {
        self.promoted.load(Ordering::Relaxed)
    }

    /// Files the rated inference as an exemplar for every retrieval-augmented variant of
    /// its function, whichever variant served it, under that variant's namespace.
    ///
    /// Returns `None` when the event is not a positive rating on a watched metric, the
    /// inference carried no embedding, or the function has no augmented variant. The
    /// example id is the inference id, so a second positive rating supersedes rather
    /// than duplicates.
    pub async fn promote(&self, event: &FeedbackEvent) -> GatewayResult<Option<ExampleId>> {
        if !self.cfg.watches(&event.record.metric) {
            return Ok(None);
        }
        let corrected = match &event.record.value {
            FeedbackValue::Demonstration(output) => Some(output.clone()),
            FeedbackValue::Text(_) => return Ok(None),
            value => match value.as_f64() {
                Some(score) if score >= self.cfg.min_value => None,
                _ => return Ok(None),
            },
        };
        let Some(record) = self.log.inference(&event.inference_id).await? else {
            warn!(inference = %event.inference_id, "rated inference missing from log");
            return Ok(None);
        };
        let Some(embedding) = record.embedding.clone() else {
            debug!(inference = %record.id, "inference has no embedding; not promoted");
            return Ok(None);
        };

        let snapshot = self.registry.current_snapshot();
        let Some(variants) = snapshot.function(&record.function) else {
            return Ok(None);
        };
        let output = corrected.unwrap_or_else(|| record.output.clone());
        let id = ExampleId::from(record.id.as_str());
        let mut filed = 0usize;
        for variant in variants.variants.values().filter(|v| v.retrieval_augmented) {
            let key = PartitionKey::new(
                &record.function,
                &variant.name,
                &variant.retrieval.namespace,
            );
            let mut example =
                Example::new(key, embedding.clone(), record.input.clone(), output.clone());
            example.id = id.clone();
            debug!(example = %id, key = %example.key, served_by = %record.variant, "promoting inference");
            self.index.upsert(example)?;
            filed += 1;
        }
        if filed == 0 {
            debug!(function = %record.function, "no retrieval-augmented variant to promote into");
            return Ok(None);
        }
        self.promoted.fetch_add(1, Ordering::Relaxed);
        metrics::record_promotion();
        Ok(Some(id))
    }

    /// Consumes applied feedback until `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        feedback: &FeedbackAggregator,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut events = feedback.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            if let Err(err) = self.promote(&event).await {
                                warn!(inference = %event.inference_id, error = %err, "promotion failed");
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "promotion fell behind feedback events");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            info!(promoted = self.promoted(), "promotion task stopped");
        })
    }
}
