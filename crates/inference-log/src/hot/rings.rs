use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tunegate_core_types::{EpisodeId, InferenceId};

use crate::config::HotCfg;
use crate::model::{Episode, FeedbackRecord, InferenceRecord, LogEntry, LogFilter};

#[derive(Debug, Default)]
pub struct EntryRing {
    capacity: usize,
    queue: Mutex<VecDeque<LogEntry>>,
}

impl EntryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(65_536))),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut guard = self.queue.lock();
        if self.capacity > 0 && guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.queue.lock().iter().cloned().collect()
    }

    pub fn collect_tail(&self, limit: usize, filter: Option<&LogFilter>) -> Vec<LogEntry> {
        let guard = self.queue.lock();
        let mut out = Vec::new();
        for entry in guard.iter().rev() {
            if filter.map(|f| f.matches(entry)).unwrap_or(true) {
                out.push(entry.clone());
                if out.len() == limit {
                    break;
                }
            }
        }
        out.reverse();
        out
    }

    pub fn collect_since(
        &self,
        ts: DateTime<Utc>,
        limit: usize,
        filter: Option<&LogFilter>,
    ) -> Vec<LogEntry> {
        let guard = self.queue.lock();
        let mut out = Vec::new();
        for entry in guard.iter() {
            if entry.ts() < ts {
                continue;
            }
            if filter.map(|f| f.matches(entry)).unwrap_or(true) {
                out.push(entry.clone());
                if out.len() == limit {
                    break;
                }
            }
        }
        out
    }
}

/// In-memory read model: a bounded tail ring plus unbounded id and episode indexes.
#[derive(Debug)]
pub struct HotRings {
    global: Arc<EntryRing>,
    inferences: DashMap<InferenceId, Arc<InferenceRecord>>,
    episodes: DashMap<EpisodeId, Arc<Mutex<Episode>>>,
    feedback: DashMap<String, Vec<FeedbackRecord>>,
}

impl HotRings {
    pub fn new(cfg: HotCfg) -> Self {
        Self {
            global: Arc::new(EntryRing::new(cfg.n_global)),
            inferences: DashMap::new(),
            episodes: DashMap::new(),
            feedback: DashMap::new(),
        }
    }

    pub fn contains_inference(&self, id: &InferenceId) -> bool {
        self.inferences.contains_key(id)
    }

    pub fn write_inference(&self, record: InferenceRecord) -> Option<bool> {
        let record = Arc::new(record);
        match self.inferences.entry(record.id.clone()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&record));
            }
        }

        // The record is addressable before its id becomes visible in the episode list.
        let mut created = false;
        let episode = self
            .episodes
            .entry(record.episode.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(Episode::new(record.episode.clone(), record.ts)))
            })
            .clone();
        episode.lock().inferences.push(record.id.clone());

        self.global.push(LogEntry::Inference((*record).clone()));
        Some(created)
    }

    pub fn write_feedback(&self, record: FeedbackRecord) {
        self.feedback
            .entry(record.target.id().to_string())
            .or_default()
            .push(record.clone());
        self.global.push(LogEntry::Feedback(record));
    }

    pub fn inference(&self, id: &InferenceId) -> Option<Arc<InferenceRecord>> {
        self.inferences.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn episode(&self, id: &EpisodeId) -> Option<Episode> {
        self.episodes.get(id).map(|entry| entry.lock().clone())
    }

    /// Inferences of an episode in submission order.
    pub fn episode_inferences(&self, id: &EpisodeId) -> Vec<Arc<InferenceRecord>> {
        let ids = match self.episodes.get(id) {
            Some(entry) => entry.lock().inferences.clone(),
            None => return Vec::new(),
        };
        ids.iter().filter_map(|id| self.inference(id)).collect()
    }

    pub fn feedback_for(&self, target_id: &str) -> Vec<FeedbackRecord> {
        self.feedback
            .get(target_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn tail(&self, limit: usize, filter: Option<&LogFilter>) -> Vec<LogEntry> {
        self.global.collect_tail(limit, filter)
    }

    pub fn since(
        &self,
        ts: DateTime<Utc>,
        limit: usize,
        filter: Option<&LogFilter>,
    ) -> Vec<LogEntry> {
        self.global.collect_since(ts, limit, filter)
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.global.snapshot()
    }

    pub fn inference_count(&self) -> usize {
        self.inferences.len()
    }

    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }
}
