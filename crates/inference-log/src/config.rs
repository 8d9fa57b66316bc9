use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level policy snapshot consumed by the log runtime.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogPolicyView {
    pub hot: HotCfg,
    pub cold: ColdCfg,
    pub idempotency: IdempotencyCfg,
}

/// Capacity knobs for the in-memory read model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotCfg {
    /// Entries retained in the global tail ring. Records stay addressable by id regardless.
    pub n_global: usize,
}

impl Default for HotCfg {
    fn default() -> Self {
        Self {
            n_global: 64_000,
        }
    }
}

/// File-level configuration for the JSONL sink standing in for the analytical store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColdCfg {
    pub enabled: bool,
    pub root: PathBuf,
    pub rotate_bytes: u64,
    pub compress: bool,
    /// When set, an append fails unless the entry reached the sink queue.
    pub required: bool,
}

impl Default for ColdCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            root: PathBuf::from("./inference-log"),
            rotate_bytes: 64 * 1024 * 1024,
            compress: false,
            required: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyCfg {
    pub lru_capacity: usize,
}

impl Default for IdempotencyCfg {
    fn default() -> Self {
        Self {
            lru_capacity: 512_000,
        }
    }
}
