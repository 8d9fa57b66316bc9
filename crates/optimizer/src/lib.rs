//! Per (function, metric) optimization state machine:
//! Idle -> Evaluating -> Triggered -> Running -> Cooldown -> Idle.

pub mod api;
pub mod config;
pub mod errors;
pub mod job;
pub mod metrics;
pub mod model;

mod machine;

pub use api::OptimizationScheduler;
pub use config::OptimizerConfig;
pub use errors::{JobError, OptimizerError};
pub use job::OptimizationJobRunner;
pub use metrics::{OptimizerMetricSnapshot, OptimizerMetrics};
pub use model::{
    JobResult, JobStatus, OptimizationPhase, OptimizationState, OptimizationTarget,
    TrainingWindow, Transition, TriggerOutcome, TriggerPolicy,
};
