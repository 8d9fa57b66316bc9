use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouterError {
    #[error("function {0} is not registered")]
    FunctionNotFound(String),
    #[error("variant {function}/{variant} does not exist")]
    VariantNotFound { function: String, variant: String },
    #[error("variant {function}/{variant} is disabled")]
    VariantDisabled { function: String, variant: String },
    #[error("function {0} has no selectable variant")]
    NoSelectableVariant(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("backend failed: {0}")]
    Backend(String),
    #[error("backend timed out after {0:?}")]
    Timeout(Duration),
}

impl RouterError {
    /// Backend failures are surfaced to the caller, never retried here.
    pub fn is_transient(&self) -> bool {
        matches!(self, RouterError::Backend(_) | RouterError::Timeout(_))
    }
}

