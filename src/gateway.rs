use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunegate_example_index::{spawn_compactor, ExampleIndex, InMemoryExampleIndex};
use tunegate_feedback::{FeedbackAck, FeedbackAggregator, FeedbackSubmission, FunctionReport};
use tunegate_inference_log::{InMemoryInferenceLog, InferenceLog};
use tunegate_optimizer::{OptimizationJobRunner, OptimizationScheduler};
use tunegate_router::{Backend, InferenceRequest, InferenceResponse, Router};
use tunegate_variant_registry::{InMemoryVariantRegistry, RegistrySnapshot, VariantRegistry};

use crate::config::GatewayConfig;
use crate::errors::GatewayResult;
use crate::promotion::Promoter;

/// Every component wired together, plus the background tasks that keep the read models
/// and the optimizer moving.
pub struct Gateway {
    cfg: GatewayConfig,
    log: Arc<InMemoryInferenceLog>,
    index: Arc<InMemoryExampleIndex>,
    registry: Arc<InMemoryVariantRegistry>,
    router: Router,
    feedback: Arc<FeedbackAggregator>,
    optimizer: Arc<OptimizationScheduler>,
    promoter: Arc<Promoter>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(
        cfg: GatewayConfig,
        routing: RegistrySnapshot,
        runner: Arc<dyn OptimizationJobRunner>,
    ) -> GatewayResult<Self> {
        cfg.validate()?;
        let log = InMemoryInferenceLog::new(cfg.log.clone());
        let log_dyn: Arc<dyn InferenceLog> = log.clone();
        let index = InMemoryExampleIndex::new(cfg.index.clone());
        let index_dyn: Arc<dyn ExampleIndex> = index.clone();
        let registry = Arc::new(InMemoryVariantRegistry::new(routing)?);
        let registry_dyn: Arc<dyn VariantRegistry> = registry.clone();

        let router = Router::new(cfg.router.clone(), registry_dyn.clone(), log_dyn.clone())
            .with_index(index_dyn.clone());
        let feedback = FeedbackAggregator::new(cfg.feedback.clone(), log_dyn.clone());
        let optimizer = OptimizationScheduler::new(
            cfg.optimizer.clone(),
            feedback.clone(),
            registry_dyn.clone(),
            runner,
        );
        let promoter = Arc::new(Promoter::new(
            cfg.promotion.clone(),
            log_dyn,
            index_dyn,
            registry_dyn,
        ));

        info!(
            version = registry.version(),
            functions = registry.current_snapshot().functions.len(),
            targets = cfg.optimizer.targets.len(),
            "gateway initialised"
        );
        Ok(Self {
            cfg,
            log,
            index,
            registry,
            router,
            feedback,
            optimizer,
            promoter,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts compaction, the optimizer tick loop and promotion. Needs a tokio runtime.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("gateway background tasks already running");
            return;
        }
        tasks.push(spawn_compactor(
            self.index.clone(),
            Duration::from_secs(self.cfg.index.compaction_interval_secs.max(1)),
            self.cancel.child_token(),
        ));
        tasks.push(
            self.optimizer
                .spawn(self.cfg.optimizer.tick_interval(), self.cancel.child_token()),
        );
        tasks.push(
            self.promoter
                .clone()
                .spawn(&self.feedback, self.cancel.child_token()),
        );
        tasks.push(spawn_pending_sweeper(
            self.feedback.clone(),
            self.cfg.feedback.pending_ttl().max(Duration::from_secs(1)),
            self.cancel.child_token(),
        ));
        info!(tasks = tasks.len(), "gateway background tasks started");
    }

    /// Stops background tasks and flushes the log.
    pub async fn shutdown(&self) -> GatewayResult<()> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        self.log.flush().await?;
        info!("gateway stopped");
        Ok(())
    }

    pub async fn infer(
        &self,
        request: InferenceRequest,
        backend: &dyn Backend,
    ) -> GatewayResult<InferenceResponse> {
        Ok(self.router.infer(request, backend).await?)
    }

    pub async fn feedback_submit(&self, submission: FeedbackSubmission) -> GatewayResult<FeedbackAck> {
        Ok(self.feedback.record(submission).await?)
    }

    pub fn report(&self, function: &str) -> FunctionReport {
        self.feedback.report(function)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.cfg
    }

    pub fn log(&self) -> &Arc<InMemoryInferenceLog> {
        &self.log
    }

    pub fn index(&self) -> &Arc<InMemoryExampleIndex> {
        &self.index
    }

    pub fn registry(&self) -> &Arc<InMemoryVariantRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn feedback(&self) -> &Arc<FeedbackAggregator> {
        &self.feedback
    }

    pub fn optimizer(&self) -> &Arc<OptimizationScheduler> {
        &self.optimizer
    }

    pub fn promoter(&self) -> &Arc<Promoter> {
        &self.promoter
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drops parked feedback that outlived its TTL, once per `interval`.
fn spawn_pending_sweeper(
    feedback: Arc<FeedbackAggregator>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = feedback.evict_expired_pending();
                    if evicted > 0 {
                        debug!(evicted, "expired pending feedback swept");
                    }
                }
            }
        }
    })
}
