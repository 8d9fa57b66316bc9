use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tunegate_example_index::ScoredExample;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Everything a backend needs to serve one request.
#[derive(Clone, Debug)]
pub struct BackendContext {
    pub function: String,
    pub variant: String,
    pub backend_ref: String,
    pub input: Value,
    /// Retrieved exemplars, most similar first. Empty for plain variants.
    pub exemplars: Vec<ScoredExample>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(&self, ctx: BackendContext) -> Result<Value, BackendError>;
}
