#![allow(dead_code)]

pub mod api;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod model;

pub mod cold;
pub mod hot;
pub mod read;

mod idempotency;

pub use api::{InMemoryInferenceLog, InferenceLog, InferenceLogBuilder, LogResult, PostHook};
pub use config::LogPolicyView;
pub use errors::{LogError, LogErrorKind};
pub use model::{
    AppendAck, EntryKind, Episode, FeedbackRecord, FeedbackTarget, FeedbackTargetKind,
    FeedbackValue, InferenceRecord, LogEntry, LogFilter, ReadHandle, SelectionReason,
};
