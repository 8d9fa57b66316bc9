use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndexError {
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("embedding dimension {actual} does not match partition dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

