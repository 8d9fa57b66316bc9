use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tunegate_core_types::{JobId, TargetKey};
use tunegate_feedback::MetricAggregate;

use crate::model::{OptimizationPhase, OptimizationState, OptimizationTarget, Transition};

pub(crate) struct MachineState {
    pub phase: OptimizationPhase,
    pub last_transition: DateTime<Utc>,
    pub last_job: Option<JobId>,
    pub last_statistic: Option<f64>,
    pub cooldown_until: Option<Instant>,
    /// End of the last launched job's training window.
    pub window_end: Option<DateTime<Utc>>,
    /// Function aggregate at the last launch; later evaluations only see what came after.
    pub baseline: MetricAggregate,
    pub means: VecDeque<f64>,
    history: VecDeque<Transition>,
}

/// One target's state plus the lock that makes job launches single-flight.
pub(crate) struct TargetMachine {
    pub key: TargetKey,
    pub target: OptimizationTarget,
    pub state: Mutex<MachineState>,
    pub flight: Arc<tokio::sync::Mutex<()>>,
    history_limit: usize,
}

impl TargetMachine {
    pub fn new(target: OptimizationTarget, history_limit: usize) -> Self {
        Self {
            key: target.key(),
            target,
            state: Mutex::new(MachineState {
                phase: OptimizationPhase::Idle,
                last_transition: Utc::now(),
                last_job: None,
                last_statistic: None,
                cooldown_until: None,
                window_end: None,
                baseline: MetricAggregate::default(),
                means: VecDeque::new(),
                history: VecDeque::new(),
            }),
            flight: Arc::new(tokio::sync::Mutex::new(())),
            history_limit: history_limit.max(1),
        }
    }

    pub fn phase(&self) -> OptimizationPhase {
        self.state.lock().phase
    }

    pub fn transition(&self, to: OptimizationPhase, note: Option<String>) {
        let mut state = self.state.lock();
        self.transition_locked(&mut state, to, note);
    }

    pub fn transition_locked(
        &self,
        state: &mut MachineState,
        to: OptimizationPhase,
        note: Option<String>,
    ) {
        let at = Utc::now();
        state.history.push_back(Transition {
            from: state.phase,
            to,
            at,
            note,
        });
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }
        state.phase = to;
        state.last_transition = at;
    }

    pub fn snapshot(&self) -> OptimizationState {
        let state = self.state.lock();
        OptimizationState {
            key: self.key.clone(),
            phase: state.phase,
            last_transition: state.last_transition,
            last_job: state.last_job.clone(),
            last_statistic: state.last_statistic,
            history: state.history.iter().cloned().collect(),
        }
    }
}
