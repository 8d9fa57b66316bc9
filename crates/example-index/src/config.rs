use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Buffered examples per partition before the buffer seals into a segment.
    pub buffer_capacity: usize,
    /// Period of the background compactor.
    pub compaction_interval_secs: u64,
    /// Partitions with fewer sealed segments than this are left alone by `compact`.
    pub min_segments_to_compact: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
            compaction_interval_secs: 60,
            min_segments_to_compact: 2,
        }
    }
}
