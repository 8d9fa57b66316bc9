use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum LogErrorKind {
    #[error("append rejected: {0}")]
    AppendRejected(String),
    #[error("cold write failed: {0}")]
    ColdWriteFailed(String),
    #[error("cold read failed: {0}")]
    ColdReadFailed(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Debug, Error)]
#[error(transparent)]
pub struct LogError(pub LogErrorKind);

impl LogError {
    pub fn new(kind: LogErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &LogErrorKind {
        &self.0
    }

    /// Errors a writer may retry; validation failures never succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.0,
            LogErrorKind::ColdWriteFailed(_) | LogErrorKind::Internal(_)
        )
    }
}

impl From<LogErrorKind> for LogError {
    fn from(kind: LogErrorKind) -> Self {
        LogError(kind)
    }
}
