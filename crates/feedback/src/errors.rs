use thiserror::Error;
use tunegate_inference_log::LogError;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("invalid feedback: {0}")]
    Validation(String),
    #[error("feedback target {0} not found")]
    TargetNotFound(String),
    #[error("pending feedback queue is full ({0} records)")]
    PendingFull(usize),
    #[error(transparent)]
    Log(#[from] LogError),
}

