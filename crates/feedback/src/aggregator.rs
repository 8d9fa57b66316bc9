use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tunegate_core_types::{FeedbackId, InferenceId};
use tunegate_inference_log::{
    FeedbackRecord, FeedbackTarget, FeedbackValue, InferenceLog, InferenceRecord, LogEntry,
};

use crate::config::FeedbackConfig;
use crate::dedupe::IdempotencyIndex;
use crate::errors::FeedbackError;
use crate::metrics::FeedbackMetrics;
use crate::model::{
    AggregateKey, FeedbackAck, FeedbackEvent, FeedbackSubmission, FunctionReport,
    MetricAggregate, MetricConfig, VariantSummary,
};
use crate::pending::{PendingFeedback, Reservation};

enum Resolution {
    Targets(Vec<Arc<InferenceRecord>>),
    Deferred(InferenceId),
}

enum Plan {
    Apply(Vec<Arc<InferenceRecord>>),
    Park(InferenceId, Reservation),
}

/// Turns validated, deduplicated feedback into log rows and running per-variant sums.
pub struct FeedbackAggregator {
    metrics_by_name: HashMap<String, MetricConfig>,
    log: Arc<dyn InferenceLog>,
    dedupe: IdempotencyIndex,
    pending: PendingFeedback,
    pending_capacity: usize,
    aggregates: DashMap<AggregateKey, MetricAggregate>,
    events: broadcast::Sender<FeedbackEvent>,
    counters: FeedbackMetrics,
}

impl FeedbackAggregator {
    /// Builds the aggregator and hooks it onto the log so parked feedback is applied as
    /// soon as its inference lands.
    pub fn new(cfg: FeedbackConfig, log: Arc<dyn InferenceLog>) -> Arc<Self> {
        let (events, _) = broadcast::channel(cfg.event_buffer.max(1));
        let aggregator = Arc::new(Self {
            metrics_by_name: cfg
                .metrics
                .iter()
                .map(|metric| (metric.name.clone(), metric.clone()))
                .collect(),
            log,
            dedupe: IdempotencyIndex::default(),
            pending: PendingFeedback::new(cfg.pending_capacity, cfg.pending_ttl()),
            pending_capacity: cfg.pending_capacity,
            aggregates: DashMap::new(),
            events,
            counters: FeedbackMetrics::default(),
        });
        let weak = Arc::downgrade(&aggregator);
        aggregator.log.register_post_hook(Arc::new(move |entry: &LogEntry| {
            if let LogEntry::Inference(record) = entry {
                if let Some(aggregator) = weak.upgrade() {
                    aggregator.on_inference(record);
                }
            }
        }));
        aggregator
    }

    pub fn metric(&self, name: &str) -> Option<&MetricConfig> {
        self.metrics_by_name.get(name)
    }

    pub fn counters(&self) -> FeedbackMetrics {
        self.counters.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedbackEvent> {
        self.events.subscribe()
    }

    pub async fn record(&self, submission: FeedbackSubmission) -> Result<FeedbackAck, FeedbackError> {
        if let Err(err) = self.validate(&submission) {
            self.counters.record_rejected();
            return Err(err);
        }
        let key = submission.idempotency_key();
        if let Some(owner) = self.dedupe.owner(&key) {
            return Ok(self.duplicate(&key, owner));
        }

        // Resolve before claiming so a missing episode leaves the key free for a retry.
        let resolution = self.resolve(&submission.target).await?;
        // Deferred feedback reserves its pending slot before the key is claimed.
        let plan = match resolution {
            Resolution::Targets(inferences) => Plan::Apply(inferences),
            Resolution::Deferred(inference_id) => match self.reserve_pending() {
                Some(slot) => Plan::Park(inference_id, slot),
                None => {
                    self.counters.record_rejected();
                    return Err(FeedbackError::PendingFull(self.pending_capacity));
                }
            },
        };

        let feedback_id = FeedbackId::new();
        if let Err(owner) = self.dedupe.claim(&key, &feedback_id) {
            self.abandon(plan);
            return Ok(self.duplicate(&key, owner));
        }
        let record = FeedbackRecord {
            id: feedback_id.clone(),
            target: submission.target,
            metric: submission.metric,
            value: submission.value,
            idempotency_key: key.clone(),
            ts: Utc::now(),
        };
        if let Err(err) = self.log.append_feedback(record.clone()).await {
            self.dedupe.release(&key);
            self.abandon(plan);
            warn!(key = %key, "feedback append failed: {err}");
            return Err(err.into());
        }

        match plan {
            Plan::Apply(inferences) => {
                for inference in &inferences {
                    self.apply(&record, inference);
                }
                self.counters.record_applied();
                debug!(key = %key, targets = inferences.len(), "feedback applied");
                Ok(FeedbackAck {
                    feedback_id,
                    applied: true,
                    deferred: false,
                })
            }
            Plan::Park(inference_id, slot) => {
                self.pending.park(slot, inference_id.clone(), record);
                self.counters.record_deferred();
                info!(key = %key, inference = %inference_id, "feedback deferred until inference is written");
                // The inference may have landed between the lookup and the park.
                match self.log.inference(&inference_id).await {
                    Ok(Some(inference)) => self.on_inference(&inference),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(inference = %inference_id, "recheck after park failed: {err}")
                    }
                }
                Ok(FeedbackAck {
                    feedback_id,
                    applied: true,
                    deferred: true,
                })
            }
        }
    }

    fn abandon(&self, plan: Plan) {
        if let Plan::Park(_, slot) = plan {
            self.pending.cancel(slot);
        }
    }

    /// Drops parked feedback whose inference never arrived within `pending_ttl_secs`.
    /// Their idempotency keys are freed so a resubmission can still count.
    pub fn evict_expired_pending(&self) -> usize {
        let evicted = self.pending.evict_expired();
        self.forget_expired(&evicted);
        evicted.len()
    }

    fn reserve_pending(&self) -> Option<Reservation> {
        let (slot, evicted) = self.pending.reserve();
        self.forget_expired(&evicted);
        slot
    }

    fn forget_expired(&self, evicted: &[FeedbackRecord]) {
        if evicted.is_empty() {
            return;
        }
        for record in evicted {
            self.dedupe.release(&record.idempotency_key);
        }
        self.counters.record_expired(evicted.len());
        warn!(count = evicted.len(), "parked feedback expired before its inference arrived");
    }

    /// Applies any feedback parked for `inference`.
    pub fn on_inference(&self, inference: &InferenceRecord) {
        let parked = self.pending.take(&inference.id);
        if parked.is_empty() {
            return;
        }
        for record in &parked {
            self.apply(record, inference);
            self.counters.record_deferred_applied();
            self.counters.record_applied();
        }
        debug!(inference = %inference.id, count = parked.len(), "deferred feedback applied");
    }

    pub fn aggregate(&self, function: &str, variant: &str, metric: &str) -> Option<MetricAggregate> {
        self.aggregates
            .get(&AggregateKey::new(function, variant, metric))
            .map(|entry| entry.value().clone())
    }

    /// All variants of `function` merged into one aggregate.
    pub fn function_aggregate(&self, function: &str, metric: &str) -> MetricAggregate {
        let mut merged = MetricAggregate::default();
        for entry in self.aggregates.iter() {
            if entry.key().function == function && entry.key().metric == metric {
                merged.merge(entry.value());
            }
        }
        merged
    }

    pub fn aggregates(&self) -> Vec<(AggregateKey, MetricAggregate)> {
        let mut all = self
            .aggregates
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect::<Vec<_>>();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn report(&self, function: &str) -> FunctionReport {
        let mut metrics: BTreeMap<String, Vec<VariantSummary>> = BTreeMap::new();
        for (key, aggregate) in self.aggregates() {
            if key.function != function {
                continue;
            }
            metrics.entry(key.metric).or_default().push(VariantSummary {
                variant: key.variant,
                count: aggregate.count,
                mean: aggregate.mean(),
                std_error: aggregate.std_error(),
            });
        }
        FunctionReport {
            function: function.to_string(),
            metrics,
        }
    }

    fn validate(&self, submission: &FeedbackSubmission) -> Result<(), FeedbackError> {
        if submission.target.id().trim().is_empty() {
            return Err(FeedbackError::Validation("target id is empty".into()));
        }
        let metric = self.metrics_by_name.get(&submission.metric).ok_or_else(|| {
            FeedbackError::Validation(format!("unknown metric {}", submission.metric))
        })?;
        if !metric.kind.accepts(&submission.value) {
            return Err(FeedbackError::Validation(format!(
                "metric {} expects {:?} values",
                metric.name, metric.kind
            )));
        }
        if let FeedbackValue::Float(value) = submission.value {
            if !value.is_finite() {
                return Err(FeedbackError::Validation(format!(
                    "metric {} received non-finite value",
                    metric.name
                )));
            }
        }
        if submission.target.kind() != metric.level.target_kind() {
            return Err(FeedbackError::Validation(format!(
                "metric {} is {:?}-level",
                metric.name, metric.level
            )));
        }
        Ok(())
    }

    async fn resolve(&self, target: &FeedbackTarget) -> Result<Resolution, FeedbackError> {
        match target {
            FeedbackTarget::Inference(id) => Ok(match self.log.inference(id).await? {
                Some(record) => Resolution::Targets(vec![record]),
                None => Resolution::Deferred(id.clone()),
            }),
            FeedbackTarget::Episode(id) => {
                let inferences = self.log.episode_inferences(id).await?;
                if inferences.is_empty() {
                    return Err(FeedbackError::TargetNotFound(id.to_string()));
                }
                Ok(Resolution::Targets(inferences))
            }
        }
    }

    fn duplicate(&self, key: &str, owner: FeedbackId) -> FeedbackAck {
        self.counters.record_duplicate();
        debug!(key, "duplicate feedback ignored");
        FeedbackAck {
            feedback_id: owner,
            applied: false,
            deferred: false,
        }
    }

    fn apply(&self, record: &FeedbackRecord, inference: &InferenceRecord) {
        if let Some(value) = record.value.as_f64() {
            let key = AggregateKey::new(&inference.function, &inference.variant, &record.metric);
            // The entry guard holds the shard lock, serializing updates per key.
            self.aggregates
                .entry(key)
                .or_default()
                .record(value, record.ts);
        }
        // No subscribers is the common case outside the gateway.
        let _ = self.events.send(FeedbackEvent {
            record: record.clone(),
            inference_id: inference.id.clone(),
            function: inference.function.clone(),
            variant: inference.variant.clone(),
        });
    }
}
