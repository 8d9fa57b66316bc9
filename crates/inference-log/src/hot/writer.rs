use std::sync::Arc;

use crate::config::HotCfg;
use crate::hot::rings::HotRings;
use crate::model::{FeedbackRecord, InferenceRecord};

pub struct HotWriter {
    rings: Arc<HotRings>,
}

impl HotWriter {
    pub fn new(cfg: HotCfg) -> Self {
        Self {
            rings: Arc::new(HotRings::new(cfg)),
        }
    }

    pub fn rings(&self) -> Arc<HotRings> {
        Arc::clone(&self.rings)
    }

    /// Returns `None` for a replayed id, otherwise whether the episode row was created.
    pub fn write_inference(&self, record: InferenceRecord) -> Option<bool> {
        self.rings.write_inference(record)
    }

    pub fn write_feedback(&self, record: FeedbackRecord) {
        self.rings.write_feedback(record);
    }
}
