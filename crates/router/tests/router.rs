use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tunegate_core_types::{EpisodeId, InferenceId};
use tunegate_example_index::{Example, ExampleIndex, IndexConfig, InMemoryExampleIndex, PartitionKey};
use tunegate_inference_log::{
    AppendAck, Episode, FeedbackRecord, InMemoryInferenceLog, InferenceLog, InferenceRecord,
    LogEntry, LogError, LogErrorKind, LogFilter, LogPolicyView, LogResult, PostHook, ReadHandle,
    SelectionReason,
};
use tunegate_router::{
    Backend, BackendContext, BackendError, InferenceRequest, Router, RouterConfig, RouterError,
    WeightedSampler,
};
use tunegate_variant_registry::{
    InMemoryVariantRegistry, RegistrySnapshot, Variant, VariantRegistry, VariantStatus,
};

const FUNCTION: &str = "draft_response";

fn snapshot(weights: &[(&str, f64)]) -> RegistrySnapshot {
    let mut snapshot = RegistrySnapshot::default();
    for (name, weight) in weights {
        snapshot.insert_variant(FUNCTION, Variant::new(*name, format!("backend-{name}"), *weight));
    }
    snapshot
}

struct Harness {
    registry: Arc<InMemoryVariantRegistry>,
    log: Arc<InMemoryInferenceLog>,
    router: Router,
}

fn harness(initial: RegistrySnapshot, cfg: RouterConfig) -> Harness {
    let registry = Arc::new(InMemoryVariantRegistry::new(initial).unwrap());
    let log = InMemoryInferenceLog::new(LogPolicyView::default());
    let router = Router::new(cfg, registry.clone(), log.clone())
        .with_sampler(WeightedSampler::seeded(42));
    Harness {
        registry,
        log,
        router,
    }
}

/// Echoes the variant it was asked to serve.
struct EchoBackend {
    seen: Mutex<Vec<BackendContext>>,
}

impl EchoBackend {
    fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Backend for EchoBackend {
    async fn call(&self, ctx: BackendContext) -> Result<Value, BackendError> {
        let output = json!({"variant": ctx.variant, "exemplars": ctx.exemplars.len()});
        self.seen.lock().push(ctx);
        Ok(output)
    }
}

struct SlowBackend(Duration);

#[async_trait]
impl Backend for SlowBackend {
    async fn call(&self, _ctx: BackendContext) -> Result<Value, BackendError> {
        tokio::time::sleep(self.0).await;
        Ok(json!("late"))
    }
}

struct FailingBackend;

#[async_trait]
impl Backend for FailingBackend {
    async fn call(&self, _ctx: BackendContext) -> Result<Value, BackendError> {
        Err(BackendError::new("upstream 503"))
    }
}

/// Rejects the first `failures` inference appends, then delegates.
struct FlakyLog {
    inner: Arc<InMemoryInferenceLog>,
    failures: AtomicUsize,
}

#[async_trait]
impl InferenceLog for FlakyLog {
    fn register_post_hook(&self, hook: PostHook) {
        self.inner.register_post_hook(hook);
    }

    async fn append_inference(&self, record: InferenceRecord) -> LogResult<AppendAck> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LogError::new(LogErrorKind::Internal("store unavailable".into())));
        }
        self.inner.append_inference(record).await
    }

    async fn append_feedback(&self, record: FeedbackRecord) -> LogResult<AppendAck> {
        self.inner.append_feedback(record).await
    }

    async fn flush(&self) -> LogResult<()> {
        self.inner.flush().await
    }

    async fn inference(&self, id: &InferenceId) -> LogResult<Option<Arc<InferenceRecord>>> {
        self.inner.inference(id).await
    }

    async fn episode(&self, id: &EpisodeId) -> LogResult<Option<Episode>> {
        self.inner.episode(id).await
    }

    async fn episode_inferences(&self, id: &EpisodeId) -> LogResult<Vec<Arc<InferenceRecord>>> {
        self.inner.episode_inferences(id).await
    }

    async fn feedback_for(&self, target_id: &str) -> LogResult<Vec<FeedbackRecord>> {
        self.inner.feedback_for(target_id).await
    }

    async fn tail(&self, limit: usize, filter: Option<LogFilter>) -> LogResult<Vec<LogEntry>> {
        self.inner.tail(limit, filter).await
    }

    async fn since(
        &self,
        ts: DateTime<Utc>,
        limit: usize,
        filter: Option<LogFilter>,
    ) -> LogResult<Vec<LogEntry>> {
        self.inner.since(ts, limit, filter).await
    }

    async fn export_range(
        &self,
        ts0: DateTime<Utc>,
        ts1: DateTime<Utc>,
        filter: Option<LogFilter>,
    ) -> LogResult<ReadHandle> {
        self.inner.export_range(ts0, ts1, filter).await
    }

    async fn export_range_to_file(
        &self,
        ts0: DateTime<Utc>,
        ts1: DateTime<Utc>,
        filter: Option<LogFilter>,
        path: &Path,
    ) -> LogResult<()> {
        self.inner.export_range_to_file(ts0, ts1, filter, path).await
    }
}

#[tokio::test]
async fn explicit_override_is_always_honored() -> anyhow::Result<()> {
    let h = harness(snapshot(&[("a", 1.0), ("b", 0.0)]), RouterConfig::default());
    for _ in 0..200 {
        let selection = h.router.select(FUNCTION, Some("b"), None).await?;
        assert_eq!(selection.variant.name, "b");
        assert_eq!(selection.reason, SelectionReason::Override);
    }
    Ok(())
}

#[tokio::test]
async fn unusable_override_falls_back_unless_required() -> anyhow::Result<()> {
    let mut initial = snapshot(&[("a", 1.0), ("b", 1.0)]);
    let mut off = Variant::new("off", "backend-off", 1.0);
    off.status = VariantStatus::Disabled;
    initial.insert_variant(FUNCTION, off);
    let h = harness(initial, RouterConfig::default());

    let fallback = h.router.select(FUNCTION, Some("off"), None).await?;
    assert_eq!(fallback.reason, SelectionReason::Weighted);
    assert_ne!(fallback.variant.name, "off");

    let backend = EchoBackend::new();
    let disabled = h
        .router
        .infer(
            InferenceRequest::new(FUNCTION, json!({})).with_override("off", true),
            &backend,
        )
        .await
        .unwrap_err();
    assert!(matches!(disabled, RouterError::VariantDisabled { .. }));

    let missing = h
        .router
        .infer(
            InferenceRequest::new(FUNCTION, json!({})).with_override("ghost", true),
            &backend,
        )
        .await
        .unwrap_err();
    assert!(matches!(missing, RouterError::VariantNotFound { .. }));
    assert_eq!(h.log.inference_count(), 0);
    Ok(())
}

#[tokio::test]
async fn unknown_function_is_reported() {
    let h = harness(snapshot(&[("a", 1.0)]), RouterConfig::default());
    let err = h.router.select("summarize", None, None).await.unwrap_err();
    assert_eq!(err, RouterError::FunctionNotFound("summarize".into()));
}

#[tokio::test]
async fn weights_follow_published_snapshot() -> anyhow::Result<()> {
    let h = harness(snapshot(&[("a", 1.0), ("b", 0.0)]), RouterConfig::default());
    for _ in 0..500 {
        assert_eq!(h.router.select(FUNCTION, None, None).await?.variant.name, "a");
    }
    let version = h.registry.publish(snapshot(&[("a", 0.0), ("b", 1.0)]))?;
    for _ in 0..500 {
        let selection = h.router.select(FUNCTION, None, None).await?;
        assert_eq!(selection.variant.name, "b");
        assert_eq!(selection.snapshot_version, version);
    }
    Ok(())
}

#[tokio::test]
async fn episode_sticks_to_first_variant_while_active() -> anyhow::Result<()> {
    let h = harness(snapshot(&[("a", 1.0), ("b", 1.0)]), RouterConfig::default());
    let backend = EchoBackend::new();
    let first = h
        .router
        .infer(InferenceRequest::new(FUNCTION, json!({"turn": 0})), &backend)
        .await?;
    let episode = first.episode_id.clone();
    for turn in 1..30 {
        let next = h
            .router
            .infer(
                InferenceRequest::new(FUNCTION, json!({"turn": turn})).with_episode(episode.clone()),
                &backend,
            )
            .await?;
        assert_eq!(next.variant_used, first.variant_used);
        assert_eq!(next.episode_id, episode);
    }
    let record = h.log.episode_inferences(&episode).await?;
    assert_eq!(record.len(), 30);
    assert_eq!(record[1].reason, SelectionReason::EpisodeAffinity);

    // Retire the pinned variant; the episode moves on.
    let other = if first.variant_used == "a" { "b" } else { "a" };
    let mut retired = snapshot(&[("a", 1.0), ("b", 1.0)]);
    if let Some(variants) = retired.functions.get_mut(FUNCTION) {
        if let Some(pinned) = variants.variants.get_mut(&first.variant_used) {
            pinned.status = VariantStatus::Shadow;
        }
    }
    h.registry.publish(retired)?;
    let moved = h
        .router
        .infer(
            InferenceRequest::new(FUNCTION, json!({"turn": 30})).with_episode(episode),
            &backend,
        )
        .await?;
    assert_eq!(moved.variant_used, other);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timed_out_call_writes_nothing() {
    let cfg = RouterConfig {
        backend_timeout_ms: Some(100),
        ..RouterConfig::default()
    };
    let h = harness(snapshot(&[("a", 1.0)]), cfg);
    let err = h
        .router
        .infer(
            InferenceRequest::new(FUNCTION, json!({})),
            &SlowBackend(Duration::from_secs(10)),
        )
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::Timeout(Duration::from_millis(100)));
    assert!(err.is_transient());
    assert_eq!(h.log.inference_count(), 0);
    assert_eq!(h.log.episode_count(), 0);
    assert_eq!(h.router.metrics().snapshot().timeouts, 1);
}

#[tokio::test]
async fn backend_error_writes_nothing() {
    let h = harness(snapshot(&[("a", 1.0)]), RouterConfig::default());
    let err = h
        .router
        .infer(InferenceRequest::new(FUNCTION, json!({})), &FailingBackend)
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::Backend("upstream 503".into()));
    assert_eq!(h.log.inference_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn append_is_retried_until_accepted() -> anyhow::Result<()> {
    let registry = Arc::new(InMemoryVariantRegistry::new(snapshot(&[("a", 1.0)]))?);
    let inner = InMemoryInferenceLog::new(LogPolicyView::default());
    let flaky = Arc::new(FlakyLog {
        inner: inner.clone(),
        failures: AtomicUsize::new(3),
    });
    let router = Router::new(RouterConfig::default(), registry, flaky);
    let response = router
        .infer(InferenceRequest::new(FUNCTION, json!({})), &EchoBackend::new())
        .await?;
    assert_eq!(inner.inference_count(), 1);
    assert!(inner.inference(&response.inference_id).await?.is_some());
    assert_eq!(router.metrics().snapshot().append_retries, 3);
    Ok(())
}

#[tokio::test]
async fn augmented_variant_receives_exemplars() -> anyhow::Result<()> {
    let mut dicl = Variant::new("dicl", "backend-dicl", 1.0);
    dicl.retrieval_augmented = true;
    dicl.retrieval.k = 2;
    dicl.retrieval.namespace = "billing".into();
    let mut initial = RegistrySnapshot::default();
    initial.insert_variant(FUNCTION, dicl);

    let index = InMemoryExampleIndex::new(IndexConfig::default());
    let key = PartitionKey::new(FUNCTION, "dicl", "billing");
    for i in 0..3 {
        index.upsert(Example::new(
            key.clone(),
            vec![1.0, i as f32],
            json!({"q": i}),
            json!({"a": i}),
        ))?;
    }

    let registry = Arc::new(InMemoryVariantRegistry::new(initial)?);
    let log = InMemoryInferenceLog::new(LogPolicyView::default());
    let router = Router::new(RouterConfig::default(), registry, log.clone()).with_index(index);
    let backend = EchoBackend::new();

    let response = router
        .infer(
            InferenceRequest::new(FUNCTION, json!({"q": "refund"})).with_embedding(vec![1.0, 0.0]),
            &backend,
        )
        .await?;
    assert_eq!(response.exemplar_ids.len(), 2);
    assert_eq!(backend.seen.lock()[0].exemplars.len(), 2);
    let record = log
        .inference(&response.inference_id)
        .await?
        .expect("record");
    assert_eq!(record.exemplars, response.exemplar_ids);
    assert_eq!(record.namespace.as_deref(), Some("billing"));

    // Wrong dimension: retrieval fails, the request still completes.
    let degraded = router
        .infer(
            InferenceRequest::new(FUNCTION, json!({})).with_embedding(vec![1.0, 0.0, 0.0]),
            &backend,
        )
        .await?;
    assert!(degraded.exemplar_ids.is_empty());
    assert_eq!(router.metrics().snapshot().retrieval_errors, 1);
    Ok(())
}

#[tokio::test]
async fn cold_partition_serves_without_exemplars() -> anyhow::Result<()> {
    let mut dicl = Variant::new("dicl", "backend-dicl", 1.0);
    dicl.retrieval_augmented = true;
    let mut initial = RegistrySnapshot::default();
    initial.insert_variant(FUNCTION, dicl);
    let registry = Arc::new(InMemoryVariantRegistry::new(initial)?);
    let log = InMemoryInferenceLog::new(LogPolicyView::default());
    let router = Router::new(RouterConfig::default(), registry, log)
        .with_index(InMemoryExampleIndex::new(IndexConfig::default()));
    let response = router
        .infer(
            InferenceRequest::new(FUNCTION, json!({})).with_embedding(vec![0.3, 0.4]),
            &EchoBackend::new(),
        )
        .await?;
    assert!(response.exemplar_ids.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_each_write_one_record() -> anyhow::Result<()> {
    let h = harness(snapshot(&[("a", 3.0), ("b", 1.0)]), RouterConfig::default());
    let router = Arc::new(h.router);
    let backend = Arc::new(EchoBackend::new());
    let tasks = (0..8)
        .map(|_| {
            let router = Arc::clone(&router);
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                for _ in 0..50 {
                    router
                        .infer(InferenceRequest::new(FUNCTION, json!({})), backend.as_ref())
                        .await
                        .map(|_| ())?;
                }
                Ok::<_, RouterError>(())
            })
        })
        .collect::<Vec<_>>();
    for task in tasks {
        task.await??;
    }
    assert_eq!(h.log.inference_count(), 400);
    assert_eq!(h.log.episode_count(), 400);
    Ok(())
}
