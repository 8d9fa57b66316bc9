use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tunegate_core_types::{EpisodeId, ExampleId, FeedbackId, InferenceId};

/// How the router arrived at the variant recorded on an inference.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    Override,
    EpisodeAffinity,
    Weighted,
}

/// One completed inference. Never mutated once appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceRecord {
    pub id: InferenceId,
    pub function: String,
    pub variant: String,
    pub episode: EpisodeId,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub snapshot_version: u64,
    pub reason: SelectionReason,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub exemplars: Vec<ExampleId>,
    pub ts: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTargetKind {
    Inference,
    Episode,
}

/// What a piece of feedback is about.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum FeedbackTarget {
    Inference(InferenceId),
    Episode(EpisodeId),
}

impl FeedbackTarget {
    pub fn kind(&self) -> FeedbackTargetKind {
        match self {
            FeedbackTarget::Inference(_) => FeedbackTargetKind::Inference,
            FeedbackTarget::Episode(_) => FeedbackTargetKind::Episode,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            FeedbackTarget::Inference(id) => id.as_str(),
            FeedbackTarget::Episode(id) => id.as_str(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FeedbackValue {
    Boolean(bool),
    Float(f64),
    Text(String),
    /// A corrected output supplied by a human reviewer.
    Demonstration(serde_json::Value),
}

impl FeedbackValue {
    /// Numeric projection used by aggregates. Text and demonstrations have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeedbackValue::Boolean(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            FeedbackValue::Float(value) => Some(*value),
            FeedbackValue::Text(_) | FeedbackValue::Demonstration(_) => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: FeedbackId,
    pub target: FeedbackTarget,
    pub metric: String,
    pub value: FeedbackValue,
    pub idempotency_key: String,
    pub ts: DateTime<Utc>,
}

/// Persisted line of the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Inference(InferenceRecord),
    Feedback(FeedbackRecord),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Inference,
    Feedback,
}

impl LogEntry {
    pub fn id(&self) -> &str {
        match self {
            LogEntry::Inference(record) => record.id.as_str(),
            LogEntry::Feedback(record) => record.id.as_str(),
        }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            LogEntry::Inference(record) => record.ts,
            LogEntry::Feedback(record) => record.ts,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            LogEntry::Inference(_) => EntryKind::Inference,
            LogEntry::Feedback(_) => EntryKind::Feedback,
        }
    }
}

/// Episode row: created with its first inference, then only appended to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub created_at: DateTime<Utc>,
    pub inferences: Vec<InferenceId>,
}

impl Episode {
    pub fn new(id: EpisodeId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            inferences: Vec::new(),
        }
    }
}

/// Acknowledgement returned to writers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppendAck {
    pub entry_id: String,
    pub accepted: bool,
    pub dropped_reason: Option<String>,
    #[serde(default)]
    pub episode_created: bool,
}

/// Filter constraints accepted by read queries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogFilter {
    pub kinds: Option<Vec<EntryKind>>,
    pub function: Option<String>,
    pub variant: Option<String>,
    pub episode: Option<EpisodeId>,
}

impl LogFilter {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&entry.kind()) {
                return false;
            }
        }
        match entry {
            LogEntry::Inference(record) => {
                if let Some(function) = &self.function {
                    if &record.function != function {
                        return false;
                    }
                }
                if let Some(variant) = &self.variant {
                    if &record.variant != variant {
                        return false;
                    }
                }
                if let Some(episode) = &self.episode {
                    if &record.episode != episode {
                        return false;
                    }
                }
                true
            }
            LogEntry::Feedback(record) => {
                // Feedback rows carry no function/variant; only the episode filter applies.
                if self.function.is_some() || self.variant.is_some() {
                    return false;
                }
                if let Some(episode) = &self.episode {
                    return record.target == FeedbackTarget::Episode(episode.clone());
                }
                true
            }
        }
    }
}

/// Result of a range export.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadHandle {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default)]
    pub entries: Vec<LogEntry>,
}
