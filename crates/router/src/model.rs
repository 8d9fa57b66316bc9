use serde::{Deserialize, Serialize};
use serde_json::Value;
use tunegate_core_types::{EpisodeId, ExampleId, InferenceId};
use tunegate_inference_log::SelectionReason;
use tunegate_variant_registry::Variant;

#[derive(Clone, Debug)]
pub struct Selection {
    pub variant: Variant,
    pub snapshot_version: u64,
    pub reason: SelectionReason,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub function: String,
    pub input: Value,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub episode_id: Option<EpisodeId>,
    #[serde(default)]
    pub variant_override: Option<String>,
    /// Fail instead of falling back when the override cannot be honored.
    #[serde(default)]
    pub override_required: bool,
}

impl InferenceRequest {
    pub fn new(function: impl Into<String>, input: Value) -> Self {
        Self {
            function: function.into(),
            input,
            embedding: None,
            episode_id: None,
            variant_override: None,
            override_required: false,
        }
    }

    pub fn with_episode(mut self, episode: EpisodeId) -> Self {
        self.episode_id = Some(episode);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_override(mut self, variant: impl Into<String>, required: bool) -> Self {
        self.variant_override = Some(variant.into());
        self.override_required = required;
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub variant_used: String,
    pub inference_id: InferenceId,
    pub episode_id: EpisodeId,
    pub output: Value,
    #[serde(default)]
    pub exemplar_ids: Vec<ExampleId>,
}
