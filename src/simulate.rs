//! Synthetic traffic for exercising a gateway end to end without real backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tunegate_core_types::{EpisodeId, JobId};
use tunegate_feedback::{FeedbackAggregator, FeedbackSubmission, FunctionReport};
use tunegate_inference_log::{FeedbackTarget, FeedbackValue};
use tunegate_optimizer::{
    JobError, JobResult, JobStatus, OptimizationJobRunner, OptimizationState, TrainingWindow,
};
use tunegate_router::{Backend, BackendContext, BackendError, InferenceRequest};
use tunegate_variant_registry::{snapshot_from_config, RegistrySnapshot, RoutingConfig};

use crate::errors::{GatewayError, GatewayResult};
use crate::Gateway;

const DEMO_ROUTING: &str = include_str!("../demos/routing.yaml");
const EMBEDDING_DIM: usize = 8;
const FEEDBACK_METRIC: &str = "intent_accuracy";

/// Routing bundled for demos and tests.
pub fn demo_routing() -> GatewayResult<RegistrySnapshot> {
    let config: RoutingConfig =
        serde_yaml::from_str(DEMO_ROUTING).map_err(|err| GatewayError::Config(err.to_string()))?;
    Ok(snapshot_from_config(config))
}

/// Backend whose answers are "correct" with a fixed probability per backend ref. Retrieved
/// exemplars raise that probability.
pub struct MockBackend {
    quality: BTreeMap<String, f64>,
    exemplar_bonus: f64,
    rng: Mutex<StdRng>,
}

impl MockBackend {
    pub fn new(seed: u64) -> Self {
        let mut quality = BTreeMap::new();
        quality.insert("mock-small".to_string(), 0.55);
        quality.insert("mock-large".to_string(), 0.8);
        Self {
            quality,
            exemplar_bonus: 0.15,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn with_quality(mut self, backend_ref: impl Into<String>, quality: f64) -> Self {
        self.quality.insert(backend_ref.into(), quality.clamp(0.0, 1.0));
        self
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn call(&self, ctx: BackendContext) -> Result<Value, BackendError> {
        let Some(base) = self.quality.get(&ctx.backend_ref) else {
            return Err(BackendError::new(format!(
                "unknown backend {}",
                ctx.backend_ref
            )));
        };
        let bonus = if ctx.exemplars.is_empty() {
            0.0
        } else {
            self.exemplar_bonus
        };
        let correct = self.rng.lock().gen_bool((base + bonus).min(1.0));
        Ok(json!({
            "backend": ctx.backend_ref,
            "variant": ctx.variant,
            "correct": correct,
            "exemplars": ctx.exemplars.len(),
        }))
    }
}

/// Stand-in optimization worker: finishes on the first poll, re-weighting variants in
/// proportion to their mean on the target metric.
#[derive(Default)]
pub struct ReweightJobRunner {
    feedback: OnceCell<Arc<FeedbackAggregator>>,
    jobs: DashMap<JobId, (String, String)>,
    floor: f64,
}

impl ReweightJobRunner {
    pub fn new() -> Self {
        Self {
            floor: 0.05,
            ..Self::default()
        }
    }

    /// The aggregator exists only once the gateway is built, after the runner.
    pub fn attach(&self, feedback: Arc<FeedbackAggregator>) {
        if self.feedback.set(feedback).is_err() {
            warn!("job runner already attached");
        }
    }
}

#[async_trait]
impl OptimizationJobRunner for ReweightJobRunner {
    async fn start(
        &self,
        function: &str,
        metric: &str,
        window: TrainingWindow,
    ) -> Result<JobId, JobError> {
        if self.feedback.get().is_none() {
            return Err(JobError::new("runner not attached to a feedback aggregator"));
        }
        let job = JobId::new();
        debug!(%job, function, metric, samples = window.samples, "reweight job started");
        self.jobs
            .insert(job.clone(), (function.to_string(), metric.to_string()));
        Ok(job)
    }

    async fn poll_status(&self, job: &JobId) -> Result<JobStatus, JobError> {
        let Some((_, (function, metric))) = self.jobs.remove(job) else {
            return Err(JobError::new(format!("unknown job {job}")));
        };
        let feedback = self
            .feedback
            .get()
            .ok_or_else(|| JobError::new("runner not attached to a feedback aggregator"))?;
        let report = feedback.report(&function);
        let weights: BTreeMap<String, f64> = report
            .metrics
            .get(&metric)
            .map(|summaries| {
                summaries
                    .iter()
                    .filter_map(|s| s.mean.map(|mean| (s.variant.clone(), mean.max(self.floor))))
                    .collect()
            })
            .unwrap_or_default();
        if weights.is_empty() {
            return Ok(JobStatus::Failed(format!("no {metric} data for {function}")));
        }
        Ok(JobStatus::Succeeded(JobResult {
            weights,
            variants: Vec::new(),
        }))
    }
}

#[derive(Clone, Debug)]
pub struct SimulationOptions {
    pub function: String,
    pub requests: usize,
    pub concurrency: usize,
    /// Requests per episode; later turns reuse the episode of the first.
    pub turns_per_episode: usize,
    pub seed: u64,
    /// Optimizer ticks run after traffic, enough to evaluate, launch and poll a job.
    pub optimizer_ticks: usize,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            function: "classify_intent".into(),
            requests: 1_000,
            concurrency: 8,
            turns_per_episode: 3,
            seed: 42,
            optimizer_ticks: 3,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SimulationReport {
    pub requests: usize,
    pub served: usize,
    pub failed: usize,
    pub feedback_applied: usize,
    pub served_by_variant: BTreeMap<String, usize>,
    pub report: FunctionReport,
    pub optimizer: Vec<OptimizationState>,
    pub registry_version: u64,
}

#[derive(Default)]
struct WorkerTally {
    served: usize,
    failed: usize,
    feedback_applied: usize,
    by_variant: BTreeMap<String, usize>,
}

/// Drives `requests` inferences through `gateway`, rating each with the backend's own
/// verdict, then ticks the optimizer.
pub async fn run(
    gateway: Arc<Gateway>,
    backend: Arc<MockBackend>,
    options: SimulationOptions,
) -> GatewayResult<SimulationReport> {
    let workers = options.concurrency.max(1);
    let turns = options.turns_per_episode.max(1);
    let mut set = JoinSet::new();
    for worker in 0..workers {
        let gateway = gateway.clone();
        let backend = backend.clone();
        let options = options.clone();
        let count = options.requests / workers + usize::from(worker < options.requests % workers);
        set.spawn(async move {
            let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(worker as u64));
            let mut tally = WorkerTally::default();
            let mut episode: Option<EpisodeId> = None;
            for turn in 0..count {
                let embedding: Vec<f32> =
                    (0..EMBEDDING_DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let mut request = InferenceRequest::new(
                    &options.function,
                    json!({ "utterance": format!("worker {worker} turn {turn}") }),
                )
                .with_embedding(embedding);
                if turn % turns != 0 {
                    if let Some(id) = &episode {
                        request = request.with_episode(id.clone());
                    }
                }
                let response = match gateway.infer(request, backend.as_ref()).await {
                    Ok(response) => response,
                    Err(err) => {
                        debug!(worker, error = %err, "simulated request failed");
                        tally.failed += 1;
                        continue;
                    }
                };
                tally.served += 1;
                *tally
                    .by_variant
                    .entry(response.variant_used.clone())
                    .or_default() += 1;
                episode = Some(response.episode_id.clone());

                let correct = response.output["correct"].as_bool().unwrap_or(false);
                let submission = FeedbackSubmission::new(
                    FeedbackTarget::Inference(response.inference_id.clone()),
                    FEEDBACK_METRIC,
                    FeedbackValue::Boolean(correct),
                );
                match gateway.feedback_submit(submission).await {
                    Ok(ack) if ack.applied => tally.feedback_applied += 1,
                    Ok(_) => {}
                    Err(err) => warn!(worker, error = %err, "simulated feedback rejected"),
                }
            }
            tally
        });
    }

    let mut report = SimulationReport {
        requests: options.requests,
        ..SimulationReport::default()
    };
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(tally) => {
                report.served += tally.served;
                report.failed += tally.failed;
                report.feedback_applied += tally.feedback_applied;
                for (variant, count) in tally.by_variant {
                    *report.served_by_variant.entry(variant).or_default() += count;
                }
            }
            Err(err) => warn!(error = %err, "simulation worker panicked"),
        }
    }

    for _ in 0..options.optimizer_ticks {
        gateway.optimizer().tick().await;
    }
    report.report = gateway.report(&options.function);
    report.optimizer = gateway.optimizer().states();
    report.registry_version = gateway.registry().version();
    info!(
        served = report.served,
        failed = report.failed,
        version = report.registry_version,
        "simulation finished"
    );
    Ok(report)
}
