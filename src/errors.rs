//! Gateway-level error wrapping every component error.

use thiserror::Error;
use tunegate_example_index::IndexError;
use tunegate_feedback::FeedbackError;
use tunegate_inference_log::LogError;
use tunegate_optimizer::OptimizerError;
use tunegate_router::RouterError;
use tunegate_variant_registry::RegistryError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("metrics export failed: {0}")]
    Metrics(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
