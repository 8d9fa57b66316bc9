use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid snapshot: {0}")]
    Validation(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid routing config: {0}")]
    Invalid(String),
    #[error("unsupported routing path: {0}")]
    UnsupportedPath(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unknown variant {function}/{variant}")]
    UnknownVariant { function: String, variant: String },
}

