use thiserror::Error;
use tunegate_core_types::TargetKey;
use tunegate_variant_registry::RegistryError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("no optimization target {0}")]
    UnknownTarget(TargetKey),
    #[error("optimization job error: {0}")]
    Job(#[from] JobError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

