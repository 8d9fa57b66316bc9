use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunegate_core_types::{JobId, TargetKey};
use tunegate_feedback::FeedbackAggregator;
use tunegate_variant_registry::model::RoutingSource;
use tunegate_variant_registry::{RegistrySnapshot, VariantRegistry};

use crate::config::OptimizerConfig;
use crate::errors::OptimizerError;
use crate::job::OptimizationJobRunner;
use crate::machine::TargetMachine;
use crate::metrics::OptimizerMetrics;
use crate::model::{
    JobResult, JobStatus, OptimizationPhase, OptimizationState, OptimizationTarget,
    TrainingWindow, TriggerOutcome,
};

/// Drives every configured target through its state machine, one `tick` at a time.
pub struct OptimizationScheduler {
    cfg: OptimizerConfig,
    feedback: Arc<FeedbackAggregator>,
    registry: Arc<dyn VariantRegistry>,
    runner: Arc<dyn OptimizationJobRunner>,
    machines: DashMap<TargetKey, Arc<TargetMachine>>,
    metrics: OptimizerMetrics,
}

impl OptimizationScheduler {
    pub fn new(
        cfg: OptimizerConfig,
        feedback: Arc<FeedbackAggregator>,
        registry: Arc<dyn VariantRegistry>,
        runner: Arc<dyn OptimizationJobRunner>,
    ) -> Arc<Self> {
        let machines = DashMap::new();
        for target in &cfg.targets {
            machines.insert(
                target.key(),
                Arc::new(TargetMachine::new(target.clone(), cfg.history_limit)),
            );
        }
        Arc::new(Self {
            cfg,
            feedback,
            registry,
            runner,
            machines,
            metrics: OptimizerMetrics::default(),
        })
    }

    /// Adds or replaces a target. A replaced target restarts from Idle.
    pub fn add_target(&self, target: OptimizationTarget) {
        self.machines.insert(
            target.key(),
            Arc::new(TargetMachine::new(target, self.cfg.history_limit)),
        );
    }

    pub fn metrics(&self) -> OptimizerMetrics {
        self.metrics.clone()
    }

    pub fn state(&self, key: &TargetKey) -> Option<OptimizationState> {
        self.machine(key).map(|machine| machine.snapshot())
    }

    pub fn states(&self) -> Vec<OptimizationState> {
        let mut states = self
            .machines
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect::<Vec<_>>();
        states.sort_by(|a, b| a.key.cmp(&b.key));
        states
    }

    fn machine(&self, key: &TargetKey) -> Option<Arc<TargetMachine>> {
        self.machines.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Advances every target by at most one step. Targets whose launch lock is held
    /// elsewhere are skipped this round.
    pub async fn tick(&self) {
        let machines = self
            .machines
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect::<Vec<_>>();
        for machine in machines {
            self.step(&machine).await;
        }
    }

    /// Starts a job for `key` now, unless one is running or cooling down.
    pub async fn trigger(&self, key: &TargetKey) -> Result<TriggerOutcome, OptimizerError> {
        let machine = self
            .machine(key)
            .ok_or_else(|| OptimizerError::UnknownTarget(key.clone()))?;
        let Ok(_flight) = machine.flight.try_lock() else {
            debug!(target = %key, "trigger ignored; launch in progress");
            return Ok(TriggerOutcome::AlreadyRunning);
        };
        match machine.phase() {
            OptimizationPhase::Running => Ok(TriggerOutcome::AlreadyRunning),
            OptimizationPhase::Cooldown => Ok(TriggerOutcome::CoolingDown),
            OptimizationPhase::Idle
            | OptimizationPhase::Evaluating
            | OptimizationPhase::Triggered => Ok(self.launch(&machine).await),
        }
    }

    async fn step(&self, machine: &TargetMachine) {
        let Ok(_flight) = machine.flight.try_lock() else {
            return;
        };
        match machine.phase() {
            OptimizationPhase::Idle | OptimizationPhase::Evaluating => self.evaluate(machine),
            OptimizationPhase::Triggered => {
                self.launch(machine).await;
            }
            OptimizationPhase::Running => self.poll(machine).await,
            OptimizationPhase::Cooldown => {
                let mut state = machine.state.lock();
                let expired = state
                    .cooldown_until
                    .map(|until| Instant::now() >= until)
                    .unwrap_or(true);
                if expired {
                    state.cooldown_until = None;
                    machine.transition_locked(&mut state, OptimizationPhase::Idle, None);
                    debug!(target = %machine.key, "cooldown elapsed");
                }
            }
        }
    }

    /// Idle -> Evaluating -> (Triggered | Idle), all within one call.
    fn evaluate(&self, machine: &TargetMachine) {
        let target = &machine.target;
        let total = self
            .feedback
            .function_aggregate(&target.function, &target.metric);
        let mut state = machine.state.lock();
        let aggregate = total.since(&state.baseline);
        if state.phase == OptimizationPhase::Idle {
            machine.transition_locked(&mut state, OptimizationPhase::Evaluating, None);
        }
        let Some(mean) = aggregate.mean().filter(|_| aggregate.count >= target.min_samples)
        else {
            machine.transition_locked(
                &mut state,
                OptimizationPhase::Idle,
                Some(format!("{} of {} samples", aggregate.count, target.min_samples)),
            );
            self.metrics.record_evaluation(false);
            return;
        };
        state.last_statistic = Some(mean);
        let fires = target.policy.fires(mean, &state.means);
        let keep = target.policy.history_len();
        if keep > 0 {
            state.means.push_back(mean);
            while state.means.len() > keep {
                state.means.pop_front();
            }
        }
        self.metrics.record_evaluation(fires);
        if fires {
            info!(target = %machine.key, mean, count = aggregate.count, "optimization triggered");
            machine.transition_locked(
                &mut state,
                OptimizationPhase::Triggered,
                Some(format!("mean {mean:.4} over {} samples", aggregate.count)),
            );
        } else {
            machine.transition_locked(&mut state, OptimizationPhase::Idle, None);
        }
    }

    /// Caller holds the machine's flight lock.
    async fn launch(&self, machine: &TargetMachine) -> TriggerOutcome {
        let target = &machine.target;
        let total = self
            .feedback
            .function_aggregate(&target.function, &target.metric);
        let window = {
            let state = machine.state.lock();
            TrainingWindow {
                since: state.window_end,
                until: Utc::now(),
                samples: total.since(&state.baseline).count,
            }
        };
        let until = window.until;
        match self
            .runner
            .start(&target.function, &target.metric, window)
            .await
        {
            Ok(job) => {
                self.metrics.record_job_started();
                let mut state = machine.state.lock();
                state.last_job = Some(job.clone());
                state.window_end = Some(until);
                state.baseline = total;
                state.means.clear();
                machine.transition_locked(
                    &mut state,
                    OptimizationPhase::Running,
                    Some(format!("job {job}")),
                );
                info!(target = %machine.key, job = %job, "optimization job started");
                TriggerOutcome::Started(job)
            }
            Err(err) => {
                self.metrics.record_job_finished(false);
                warn!(target = %machine.key, "optimization job failed to start: {err}");
                self.enter_cooldown(machine, format!("start failed: {err}"));
                TriggerOutcome::StartFailed(err.message)
            }
        }
    }

    async fn poll(&self, machine: &TargetMachine) {
        let job = machine.state.lock().last_job.clone();
        let Some(job) = job else {
            self.enter_cooldown(machine, "running without a job id".into());
            return;
        };
        let status = match self.runner.poll_status(&job).await {
            Ok(status) => status,
            Err(err) => {
                warn!(target = %machine.key, job = %job, "job status poll failed: {err}");
                return;
            }
        };
        match status {
            JobStatus::Running => {}
            JobStatus::Succeeded(result) => {
                self.metrics.record_job_finished(true);
                let note = match self.apply_result(&machine.target.function, &job, result) {
                    Ok(Some(version)) => format!("job {job} published version {version}"),
                    Ok(None) => format!("job {job} succeeded without changes"),
                    Err(err) => {
                        self.metrics.record_publish_rejected();
                        warn!(target = %machine.key, job = %job, "job result rejected: {err}");
                        format!("job {job} result rejected: {err}")
                    }
                };
                self.enter_cooldown(machine, note);
            }
            JobStatus::Failed(reason) => {
                self.metrics.record_job_finished(false);
                warn!(target = %machine.key, job = %job, %reason, "optimization job failed");
                self.enter_cooldown(machine, format!("job {job} failed: {reason}"));
            }
        }
    }

    fn apply_result(
        &self,
        function: &str,
        job: &JobId,
        result: JobResult,
    ) -> Result<Option<u64>, OptimizerError> {
        if result.weights.is_empty() && result.variants.is_empty() {
            return Ok(None);
        }
        let current = self.registry.current_snapshot();
        let mut next: RegistrySnapshot = current.as_ref().clone();
        for variant in result.variants {
            let path = format!("{function}.{}.weight", variant.name);
            next.insert_variant(function, variant);
            next.set_provenance(&path, RoutingSource::Optimizer);
        }
        if !result.weights.is_empty() {
            next = next.with_weights(function, &result.weights)?;
            for name in result.weights.keys() {
                next.set_provenance(
                    &format!("{function}.{name}.weight"),
                    RoutingSource::Optimizer,
                );
            }
        }
        let version = self.registry.publish(next)?;
        info!(function, job = %job, version, "optimization result published");
        Ok(Some(version))
    }

    fn enter_cooldown(&self, machine: &TargetMachine, note: String) {
        let mut state = machine.state.lock();
        state.cooldown_until = Some(Instant::now() + self.cfg.cooldown());
        machine.transition_locked(&mut state, OptimizationPhase::Cooldown, Some(note));
    }

    /// Ticks every `interval` until `cancel` fires.
    pub fn spawn(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("optimization scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => scheduler.tick().await,
                }
            }
        })
    }
}
