use std::panic;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task;
use tracing::{debug, warn};
use tunegate_core_types::{EpisodeId, InferenceId};

use crate::cold::writer::{self, ColdWriterHandle};
use crate::config::LogPolicyView;
use crate::errors::{LogError, LogErrorKind};
use crate::hot::rings::HotRings;
use crate::hot::writer::HotWriter;
use crate::idempotency::IdempotencyTracker;
use crate::metrics::LogMetrics;
use crate::model::{
    AppendAck, Episode, FeedbackRecord, InferenceRecord, LogEntry, LogFilter, ReadHandle,
};
use crate::read::export;

pub type LogResult<T> = Result<T, LogError>;
pub type PostHook = Arc<dyn Fn(&LogEntry) + Send + Sync + 'static>;

/// Append-only source of truth for inferences and feedback, plus its read model.
#[async_trait]
pub trait InferenceLog: Send + Sync {
    fn register_post_hook(&self, hook: PostHook);

    /// Appends a completed inference. Re-appending an id already present is acknowledged
    /// with `accepted = false` and leaves the log unchanged.
    async fn append_inference(&self, record: InferenceRecord) -> LogResult<AppendAck>;
    async fn append_feedback(&self, record: FeedbackRecord) -> LogResult<AppendAck>;
    async fn flush(&self) -> LogResult<()>;

    async fn inference(&self, id: &InferenceId) -> LogResult<Option<Arc<InferenceRecord>>>;
    async fn episode(&self, id: &EpisodeId) -> LogResult<Option<Episode>>;
    /// Inferences of one episode, in submission order.
    async fn episode_inferences(&self, id: &EpisodeId)
        -> LogResult<Vec<Arc<InferenceRecord>>>;
    async fn feedback_for(&self, target_id: &str) -> LogResult<Vec<FeedbackRecord>>;
    async fn tail(&self, limit: usize, filter: Option<LogFilter>) -> LogResult<Vec<LogEntry>>;
    async fn since(
        &self,
        ts: DateTime<Utc>,
        limit: usize,
        filter: Option<LogFilter>,
    ) -> LogResult<Vec<LogEntry>>;
    /// Entries in `[ts0, ts1]`; a filter scopes inferences and keeps the feedback on them.
    async fn export_range(
        &self,
        ts0: DateTime<Utc>,
        ts1: DateTime<Utc>,
        filter: Option<LogFilter>,
    ) -> LogResult<ReadHandle>;
    async fn export_range_to_file(
        &self,
        ts0: DateTime<Utc>,
        ts1: DateTime<Utc>,
        filter: Option<LogFilter>,
        path: &Path,
    ) -> LogResult<()>;
}

pub struct InMemoryInferenceLog {
    policy: RwLock<LogPolicyView>,
    hot_writer: HotWriter,
    hot_rings: Arc<HotRings>,
    cold: RwLock<Option<ColdWriterHandle>>,
    idempotency: IdempotencyTracker,
    metrics: LogMetrics,
    hooks: HookRegistry,
}

impl InMemoryInferenceLog {
    pub fn new(policy: LogPolicyView) -> Arc<Self> {
        let hot_writer = HotWriter::new(policy.hot.clone());
        let hot_rings = hot_writer.rings();
        let metrics = LogMetrics::default();
        let cold = writer::spawn(policy.cold.clone(), metrics.clone());
        if policy.cold.enabled && cold.is_none() {
            warn!("cold sink enabled but writer thread failed to start");
        }
        Arc::new(Self {
            idempotency: IdempotencyTracker::with_capacity(policy.idempotency.lru_capacity),
            metrics,
            cold: RwLock::new(cold),
            hot_rings,
            hot_writer,
            hooks: HookRegistry::default(),
            policy: RwLock::new(policy),
        })
    }

    pub fn metrics(&self) -> LogMetrics {
        self.metrics.clone()
    }

    pub fn inference_count(&self) -> usize {
        self.hot_rings.inference_count()
    }

    pub fn episode_count(&self) -> usize {
        self.hot_rings.episode_count()
    }

    pub fn register_post_hook_fn<F>(&self, hook: F)
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.hooks.register(Arc::new(hook));
    }

    fn send_cold(&self, entry: &LogEntry) -> LogResult<()> {
        let Some(cold) = self.cold.read().clone() else {
            return Ok(());
        };
        if let Err(err) = cold.append(entry.clone()) {
            self.metrics.record_cold_error();
            if self.policy.read().cold.required {
                return Err(LogErrorKind::ColdWriteFailed(err.to_string()).into());
            }
            warn!(entry = entry.id(), error = %err, "cold append failed; keeping hot copy");
        }
        Ok(())
    }
}

#[async_trait]
impl InferenceLog for InMemoryInferenceLog {
    fn register_post_hook(&self, hook: PostHook) {
        self.hooks.register(hook);
    }

    async fn append_inference(&self, record: InferenceRecord) -> LogResult<AppendAck> {
        let entry_id = record.id.to_string();
        if self.hot_rings.contains_inference(&record.id) {
            self.metrics.record_duplicate();
            return Ok(AppendAck {
                entry_id,
                accepted: false,
                dropped_reason: Some("duplicate".into()),
                episode_created: false,
            });
        }

        let entry = LogEntry::Inference(record.clone());
        self.send_cold(&entry)?;

        let Some(episode_created) = self.hot_writer.write_inference(record) else {
            self.metrics.record_duplicate();
            return Ok(AppendAck {
                entry_id,
                accepted: false,
                dropped_reason: Some("duplicate".into()),
                episode_created: false,
            });
        };
        self.metrics.record_inference();
        debug!(inference = %entry_id, episode_created, "inference appended");
        self.hooks.emit(&entry);

        Ok(AppendAck {
            entry_id,
            accepted: true,
            dropped_reason: None,
            episode_created,
        })
    }

    async fn append_feedback(&self, record: FeedbackRecord) -> LogResult<AppendAck> {
        let entry_id = record.id.to_string();
        if !self.idempotency.accept(&entry_id) {
            self.metrics.record_duplicate();
            return Ok(AppendAck {
                entry_id,
                accepted: false,
                dropped_reason: Some("duplicate".into()),
                episode_created: false,
            });
        }

        let entry = LogEntry::Feedback(record.clone());
        if let Err(err) = self.send_cold(&entry) {
            self.idempotency.release(&entry_id);
            self.metrics.record_rejected();
            return Err(err);
        }
        self.hot_writer.write_feedback(record);
        self.metrics.record_feedback();
        self.hooks.emit(&entry);

        Ok(AppendAck {
            entry_id,
            accepted: true,
            dropped_reason: None,
            episode_created: false,
        })
    }

    async fn flush(&self) -> LogResult<()> {
        let cold_handle = self.cold.read().clone();
        if let Some(cold) = cold_handle {
            let (result, elapsed) = task::spawn_blocking(move || {
                let start = Instant::now();
                let res = cold.flush();
                (res, start.elapsed())
            })
            .await
            .map_err(|err| LogError::from(LogErrorKind::Internal(err.to_string())))?;
            if let Err(err) = result {
                self.metrics.record_cold_error();
                return Err(LogErrorKind::ColdWriteFailed(err.to_string()).into());
            }
            debug!(elapsed_ms = elapsed.as_millis() as u64, "cold sink flushed");
        }
        Ok(())
    }

    async fn inference(&self, id: &InferenceId) -> LogResult<Option<Arc<InferenceRecord>>> {
        Ok(self.hot_rings.inference(id))
    }

    async fn episode(&self, id: &EpisodeId) -> LogResult<Option<Episode>> {
        Ok(self.hot_rings.episode(id))
    }

    async fn episode_inferences(
        &self,
        id: &EpisodeId,
    ) -> LogResult<Vec<Arc<InferenceRecord>>> {
        Ok(self.hot_rings.episode_inferences(id))
    }

    async fn feedback_for(&self, target_id: &str) -> LogResult<Vec<FeedbackRecord>> {
        Ok(self.hot_rings.feedback_for(target_id))
    }

    async fn tail(&self, limit: usize, filter: Option<LogFilter>) -> LogResult<Vec<LogEntry>> {
        Ok(self.hot_rings.tail(limit, filter.as_ref()))
    }

    async fn since(
        &self,
        ts: DateTime<Utc>,
        limit: usize,
        filter: Option<LogFilter>,
    ) -> LogResult<Vec<LogEntry>> {
        Ok(self.hot_rings.since(ts, limit, filter.as_ref()))
    }

    async fn export_range(
        &self,
        ts0: DateTime<Utc>,
        ts1: DateTime<Utc>,
        filter: Option<LogFilter>,
    ) -> LogResult<ReadHandle> {
        if ts1 < ts0 {
            return Err(LogErrorKind::InvalidRange("ts1 < ts0".into()).into());
        }
        let cold_cfg = self.policy.read().cold.clone();
        let entries = export::collect_range(
            self.hot_rings.as_ref(),
            &cold_cfg,
            ts0,
            ts1,
            filter.as_ref(),
        )
        .map_err(|err| LogErrorKind::ColdReadFailed(err.to_string()))?;
        Ok(ReadHandle {
            from: ts0,
            to: ts1,
            entries,
        })
    }

    async fn export_range_to_file(
        &self,
        ts0: DateTime<Utc>,
        ts1: DateTime<Utc>,
        filter: Option<LogFilter>,
        path: &Path,
    ) -> LogResult<()> {
        self.flush().await?;
        let handle = self.export_range(ts0, ts1, filter.clone()).await?;
        export::write_export_file(path, &handle, filter.as_ref())
            .map_err(|err| LogErrorKind::ColdWriteFailed(err.to_string()))?;
        Ok(())
    }
}

#[derive(Default)]
struct HookRegistry {
    hooks: RwLock<Vec<PostHook>>,
}

impl HookRegistry {
    fn register(&self, hook: PostHook) {
        self.hooks.write().push(hook);
    }

    fn emit(&self, entry: &LogEntry) {
        let snapshot: Vec<PostHook> = self.hooks.read().iter().cloned().collect();
        for hook in snapshot {
            if panic::catch_unwind(panic::AssertUnwindSafe(|| (hook)(entry))).is_err() {
                warn!(entry = entry.id(), "log post-hook panicked; continuing");
            }
        }
    }
}

/// Builder helper to keep initialization extendable.
#[derive(Default)]
pub struct InferenceLogBuilder {
    policy: LogPolicyView,
}

impl InferenceLogBuilder {
    pub fn new(policy: LogPolicyView) -> Self {
        Self { policy }
    }

    pub fn build(self) -> Arc<dyn InferenceLog> {
        InMemoryInferenceLog::new(self.policy)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tunegate_core_types::FeedbackId;

    use super::*;
    use crate::config::ColdCfg;
    use crate::model::{EntryKind, FeedbackTarget, FeedbackValue, SelectionReason};

    fn inference(episode: &EpisodeId, variant: &str) -> InferenceRecord {
        InferenceRecord {
            id: InferenceId::new(),
            function: "classify_intent".into(),
            variant: variant.into(),
            episode: episode.clone(),
            input: json!({ "query": "reset password" }),
            output: json!({ "intent": "account" }),
            embedding: None,
            snapshot_version: 1,
            reason: SelectionReason::Weighted,
            namespace: None,
            exemplars: Vec::new(),
            ts: Utc::now(),
        }
    }

    fn feedback(target: FeedbackTarget) -> FeedbackRecord {
        FeedbackRecord {
            id: FeedbackId::new(),
            idempotency_key: format!("{}:accuracy", target.id()),
            target,
            metric: "accuracy".into(),
            value: FeedbackValue::Float(0.5),
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn episode_preserves_submission_order() {
        let log = InMemoryInferenceLog::new(LogPolicyView::default());
        let episode = EpisodeId::new();
        let mut ids = Vec::new();
        for variant in ["a", "b", "c"] {
            let record = inference(&episode, variant);
            ids.push(record.id.clone());
            log.append_inference(record).await.unwrap();
        }
        let stored: Vec<_> = log
            .episode_inferences(&episode)
            .await
            .unwrap()
            .iter()
            .map(|record| record.id.clone())
            .collect();
        assert_eq!(stored, ids);
        assert_eq!(log.episode(&episode).await.unwrap().unwrap().inferences, ids);
    }

    #[tokio::test]
    async fn first_inference_creates_episode_row() {
        let log = InMemoryInferenceLog::new(LogPolicyView::default());
        let episode = EpisodeId::new();
        let first = log.append_inference(inference(&episode, "a")).await.unwrap();
        let second = log.append_inference(inference(&episode, "a")).await.unwrap();
        assert!(first.episode_created);
        assert!(!second.episode_created);
        assert_eq!(log.episode_count(), 1);
    }

    #[tokio::test]
    async fn reappending_an_inference_is_a_no_op() {
        let log = InMemoryInferenceLog::new(LogPolicyView::default());
        let record = inference(&EpisodeId::new(), "a");
        assert!(log.append_inference(record.clone()).await.unwrap().accepted);
        let replay = log.append_inference(record).await.unwrap();
        assert!(!replay.accepted);
        assert_eq!(replay.dropped_reason.as_deref(), Some("duplicate"));
        assert_eq!(log.inference_count(), 1);
        assert_eq!(log.metrics().snapshot().duplicates, 1);
    }

    #[tokio::test]
    async fn feedback_is_indexed_by_target() {
        let log = InMemoryInferenceLog::new(LogPolicyView::default());
        let record = inference(&EpisodeId::new(), "a");
        let target = FeedbackTarget::Inference(record.id.clone());
        log.append_inference(record.clone()).await.unwrap();
        let fb = feedback(target);
        assert!(log.append_feedback(fb.clone()).await.unwrap().accepted);
        assert!(!log.append_feedback(fb).await.unwrap().accepted);
        assert_eq!(log.feedback_for(record.id.as_str()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tail_applies_filters() {
        let log = InMemoryInferenceLog::new(LogPolicyView::default());
        let episode = EpisodeId::new();
        log.append_inference(inference(&episode, "a")).await.unwrap();
        log.append_inference(inference(&episode, "b")).await.unwrap();
        log.append_feedback(feedback(FeedbackTarget::Episode(episode.clone())))
            .await
            .unwrap();

        let only_b = LogFilter {
            variant: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(log.tail(10, Some(only_b)).await.unwrap().len(), 1);

        let only_feedback = LogFilter {
            kinds: Some(vec![EntryKind::Feedback]),
            ..Default::default()
        };
        let rows = log.tail(10, Some(only_feedback)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind(), EntryKind::Feedback);
    }

    #[tokio::test]
    async fn post_hooks_see_every_accepted_entry() {
        let log = InMemoryInferenceLog::new(LogPolicyView::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        log.register_post_hook_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        log.register_post_hook_fn(|_| panic!("misbehaving hook"));
        let record = inference(&EpisodeId::new(), "a");
        log.append_inference(record.clone()).await.unwrap();
        log.append_inference(record).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cold_sink_round_trips_through_export() {
        let dir = tempfile::tempdir().unwrap();
        for compress in [false, true] {
            let root = dir.path().join(format!("cold-{compress}"));
            let policy = LogPolicyView {
                cold: ColdCfg {
                    enabled: true,
                    root: root.clone(),
                    compress,
                    ..ColdCfg::default()
                },
                ..LogPolicyView::default()
            };
            let log = InMemoryInferenceLog::new(policy);
            let from = Utc::now() - chrono::Duration::seconds(1);
            let episode = EpisodeId::new();
            for _ in 0..3 {
                log.append_inference(inference(&episode, "a")).await.unwrap();
            }
            log.flush().await.unwrap();

            let out = dir.path().join(format!("export-{compress}.jsonl"));
            let to = Utc::now() + chrono::Duration::seconds(1);
            log.export_range_to_file(from, to, None, &out).await.unwrap();
            let content = std::fs::read_to_string(&out).unwrap();
            let mut lines = content.lines();
            let header: serde_json::Value =
                serde_json::from_str(lines.next().unwrap()).unwrap();
            assert_eq!(header["count"], 3);
            assert_eq!(lines.count(), 3);

            let cold_only = export::collect_range(
                &HotRings::new(Default::default()),
                &ColdCfg {
                    enabled: true,
                    root,
                    compress,
                    ..ColdCfg::default()
                },
                from,
                to,
                None,
            )
            .unwrap();
            assert_eq!(cold_only.len(), 3);
        }
    }

    #[tokio::test]
    async fn scoped_export_keeps_feedback_on_matching_inferences() {
        let log = InMemoryInferenceLog::new(LogPolicyView::default());
        let from = Utc::now() - chrono::Duration::seconds(1);
        let kept = inference(&EpisodeId::new(), "a");
        let mut other = inference(&EpisodeId::new(), "a");
        other.function = "draft_response".into();
        log.append_inference(kept.clone()).await.unwrap();
        log.append_inference(other.clone()).await.unwrap();
        log.append_feedback(feedback(FeedbackTarget::Inference(kept.id.clone())))
            .await
            .unwrap();
        log.append_feedback(feedback(FeedbackTarget::Episode(kept.episode.clone())))
            .await
            .unwrap();
        log.append_feedback(feedback(FeedbackTarget::Inference(other.id.clone())))
            .await
            .unwrap();
        let to = Utc::now() + chrono::Duration::seconds(1);

        let by_function = LogFilter {
            function: Some("classify_intent".into()),
            ..LogFilter::default()
        };
        let handle = log
            .export_range(from, to, Some(by_function.clone()))
            .await
            .unwrap();
        assert_eq!(handle.entries.len(), 3);
        assert!(handle.entries.iter().all(|entry| match entry {
            LogEntry::Inference(record) => record.id == kept.id,
            LogEntry::Feedback(record) => record.target.id() != other.id.as_str(),
        }));

        let feedback_only = LogFilter {
            kinds: Some(vec![EntryKind::Feedback]),
            ..by_function
        };
        let handle = log.export_range(from, to, Some(feedback_only)).await.unwrap();
        assert_eq!(handle.entries.len(), 2);
        assert!(handle
            .entries
            .iter()
            .all(|entry| entry.kind() == EntryKind::Feedback));

        let unfiltered = log.export_range(from, to, None).await.unwrap();
        assert_eq!(unfiltered.entries.len(), 5);
    }

    #[tokio::test]
    async fn export_rejects_inverted_range() {
        let log = InMemoryInferenceLog::new(LogPolicyView::default());
        let now = Utc::now();
        let err = log
            .export_range(now, now - chrono::Duration::seconds(5), None)
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), LogErrorKind::InvalidRange(_)));
    }
}
