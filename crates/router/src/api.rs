use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use tunegate_core_types::{EpisodeId, InferenceId};
use tunegate_example_index::{ExampleIndex, ScoredExample};
use tunegate_inference_log::{InferenceLog, InferenceRecord, SelectionReason};
use tunegate_variant_registry::{RegistrySnapshot, Variant, VariantRegistry};

use crate::backend::{Backend, BackendContext};
use crate::config::RouterConfig;
use crate::errors::RouterError;
use crate::metrics::RouterMetrics;
use crate::model::{InferenceRequest, InferenceResponse, Selection};
use crate::sampler::WeightedSampler;

/// Chooses a variant per request and records the completed inference.
pub struct Router {
    cfg: RouterConfig,
    registry: Arc<dyn VariantRegistry>,
    log: Arc<dyn InferenceLog>,
    index: Option<Arc<dyn ExampleIndex>>,
    sampler: WeightedSampler,
    metrics: RouterMetrics,
}

impl Router {
    pub fn new(
        cfg: RouterConfig,
        registry: Arc<dyn VariantRegistry>,
        log: Arc<dyn InferenceLog>,
    ) -> Self {
        let sampler = match cfg.sampler_seed {
            Some(seed) => WeightedSampler::seeded(seed),
            None => WeightedSampler::from_entropy(),
        };
        Self {
            cfg,
            registry,
            log,
            index: None,
            sampler,
            metrics: RouterMetrics::default(),
        }
    }

    pub fn with_index(mut self, index: Arc<dyn ExampleIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_sampler(mut self, sampler: WeightedSampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn metrics(&self) -> RouterMetrics {
        self.metrics.clone()
    }

    /// Picks the variant for one request against the current registry snapshot.
    ///
    /// An explicit override wins while the variant exists and is not disabled. Otherwise a
    /// prior inference of the same function in the episode pins its variant while that
    /// variant stays active. Everything else is a weighted draw over active variants.
    pub async fn select(
        &self,
        function: &str,
        explicit_variant: Option<&str>,
        episode: Option<&EpisodeId>,
    ) -> Result<Selection, RouterError> {
        self.select_with(function, explicit_variant, false, episode)
            .await
    }

    async fn select_with(
        &self,
        function: &str,
        explicit_variant: Option<&str>,
        override_required: bool,
        episode: Option<&EpisodeId>,
    ) -> Result<Selection, RouterError> {
        let snapshot = self.registry.current_snapshot();
        let variants = snapshot
            .function(function)
            .ok_or_else(|| RouterError::FunctionNotFound(function.to_string()))?;

        if let Some(name) = explicit_variant {
            match variants.get(name) {
                Some(variant) if variant.is_selectable() => {
                    return Ok(self.selected(&snapshot, variant, SelectionReason::Override));
                }
                Some(_) if override_required => {
                    return Err(RouterError::VariantDisabled {
                        function: function.to_string(),
                        variant: name.to_string(),
                    });
                }
                None if override_required => {
                    return Err(RouterError::VariantNotFound {
                        function: function.to_string(),
                        variant: name.to_string(),
                    });
                }
                found => {
                    warn!(
                        function,
                        variant = name,
                        disabled = found.is_some(),
                        "override cannot be honored; falling back"
                    );
                }
            }
        }

        if let Some(episode) = episode {
            if let Some(variant) = self.episode_variant(&snapshot, function, episode).await {
                return Ok(self.selected(&snapshot, variant, SelectionReason::EpisodeAffinity));
            }
        }

        let candidates = variants
            .active()
            .map(|variant| (variant.name.as_str(), variant.weight))
            .collect::<Vec<_>>();
        let name = self
            .sampler
            .pick(&candidates)
            .ok_or_else(|| RouterError::NoSelectableVariant(function.to_string()))?;
        let variant = variants
            .get(name)
            .ok_or_else(|| RouterError::NoSelectableVariant(function.to_string()))?;
        Ok(self.selected(&snapshot, variant, SelectionReason::Weighted))
    }

    fn selected(
        &self,
        snapshot: &RegistrySnapshot,
        variant: &Variant,
        reason: SelectionReason,
    ) -> Selection {
        self.metrics.record_selection(reason);
        Selection {
            variant: variant.clone(),
            snapshot_version: snapshot.version,
            reason,
        }
    }

    /// Variant of the latest inference for `function` in the episode, if still active.
    async fn episode_variant<'a>(
        &self,
        snapshot: &'a RegistrySnapshot,
        function: &str,
        episode: &EpisodeId,
    ) -> Option<&'a Variant> {
        let records = match self.log.episode_inferences(episode).await {
            Ok(records) => records,
            Err(err) => {
                warn!(episode = %episode, "episode lookup failed, using weights: {err}");
                return None;
            }
        };
        let previous = records
            .iter()
            .rev()
            .find(|record| record.function == function)?;
        snapshot
            .variant(function, &previous.variant)
            .filter(|variant| variant.is_active())
    }

    /// Full request path: select, retrieve exemplars, call the backend, record.
    ///
    /// Nothing is written when the backend fails or times out. Once the backend has
    /// answered, the record is appended with backoff until the log accepts it.
    pub async fn infer(
        &self,
        request: InferenceRequest,
        backend: &dyn Backend,
    ) -> Result<InferenceResponse, RouterError> {
        if request.function.trim().is_empty() {
            return Err(RouterError::InvalidRequest("function name is empty".into()));
        }
        let selection = self
            .select_with(
                &request.function,
                request.variant_override.as_deref(),
                request.override_required,
                request.episode_id.as_ref(),
            )
            .await?;
        let variant = &selection.variant;

        let exemplars = self.retrieve(&request, variant);
        let ctx = BackendContext {
            function: request.function.clone(),
            variant: variant.name.clone(),
            backend_ref: variant.backend_ref.clone(),
            input: request.input.clone(),
            exemplars: exemplars.clone(),
        };
        let output = self.call_backend(backend, ctx).await?;

        let record = InferenceRecord {
            id: InferenceId::new(),
            function: request.function,
            variant: variant.name.clone(),
            episode: request.episode_id.unwrap_or_default(),
            input: request.input,
            output: output.clone(),
            embedding: request.embedding,
            snapshot_version: selection.snapshot_version,
            reason: selection.reason,
            namespace: variant
                .retrieval_augmented
                .then(|| variant.retrieval.namespace.clone()),
            exemplars: exemplars
                .iter()
                .map(|scored| scored.example.id.clone())
                .collect(),
            ts: Utc::now(),
        };
        let response = InferenceResponse {
            variant_used: record.variant.clone(),
            inference_id: record.id.clone(),
            episode_id: record.episode.clone(),
            output,
            exemplar_ids: record.exemplars.clone(),
        };
        self.append_until_accepted(record).await;
        self.metrics.record_inference();
        Ok(response)
    }

    fn retrieve(&self, request: &InferenceRequest, variant: &Variant) -> Vec<ScoredExample> {
        if !variant.retrieval_augmented {
            return Vec::new();
        }
        let (Some(index), Some(embedding)) = (&self.index, &request.embedding) else {
            return Vec::new();
        };
        match index.query(
            &request.function,
            &variant.name,
            &variant.retrieval.namespace,
            embedding,
            variant.retrieval.k,
        ) {
            Ok(found) => {
                if found.len() < variant.retrieval.k {
                    debug!(
                        function = %request.function,
                        variant = %variant.name,
                        found = found.len(),
                        wanted = variant.retrieval.k,
                        "partial exemplar set"
                    );
                }
                found
            }
            Err(err) => {
                self.metrics.record_retrieval_error();
                warn!(
                    function = %request.function,
                    variant = %variant.name,
                    "exemplar retrieval failed, continuing without: {err}"
                );
                Vec::new()
            }
        }
    }

    async fn call_backend(
        &self,
        backend: &dyn Backend,
        ctx: BackendContext,
    ) -> Result<serde_json::Value, RouterError> {
        let variant = ctx.variant.clone();
        let result = match self.cfg.backend_timeout() {
            Some(limit) => match tokio::time::timeout(limit, backend.call(ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    self.metrics.record_timeout();
                    warn!(variant = %variant, timeout = ?limit, "backend call timed out");
                    return Err(RouterError::Timeout(limit));
                }
            },
            None => backend.call(ctx).await,
        };
        result.map_err(|err| {
            self.metrics.record_backend_error();
            warn!(variant = %variant, "backend call failed: {err}");
            RouterError::Backend(err.message)
        })
    }

    async fn append_until_accepted(&self, record: InferenceRecord) {
        let mut backoff = Duration::from_millis(self.cfg.append_backoff_initial_ms.max(1));
        let cap = Duration::from_millis(self.cfg.append_backoff_max_ms.max(1));
        let mut attempt = 1u32;
        loop {
            match self.log.append_inference(record.clone()).await {
                Ok(ack) => {
                    if attempt > 1 {
                        info!(inference = %ack.entry_id, attempt, "inference appended after retry");
                    }
                    return;
                }
                Err(err) => {
                    self.metrics.record_append_retry();
                    warn!(
                        inference = %record.id,
                        attempt,
                        backoff = ?backoff,
                        "inference append failed: {err}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(cap);
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
