use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tunegate_core_types::ExampleId;

use crate::errors::IndexError;
use crate::model::{Example, ScoredExample};
use crate::similarity::{cosine, l2};

/// One stored copy. `seq` orders copies of the same id; the highest wins.
#[derive(Clone, Debug)]
pub(crate) struct Entry {
    pub seq: u64,
    pub norm: f64,
    pub example: Arc<Example>,
}

/// Immutable once built.
#[derive(Debug, Default)]
pub(crate) struct Segment {
    pub entries: Vec<Entry>,
}

#[derive(Debug, Default)]
struct Buffer {
    dim: Option<usize>,
    next_seq: u64,
    entries: Vec<Entry>,
}

pub(crate) struct Partition {
    capacity: usize,
    buffer: RwLock<Buffer>,
    segments: ArcSwap<Vec<Arc<Segment>>>,
}

pub(crate) struct UpsertOutcome {
    pub sealed: bool,
}

pub(crate) struct MergeOutcome {
    pub segments_merged: usize,
    pub superseded_dropped: usize,
}

impl Partition {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: RwLock::new(Buffer::default()),
            segments: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn upsert(&self, example: Example) -> Result<UpsertOutcome, IndexError> {
        let norm = l2(&example.embedding);
        let mut buffer = self.buffer.write();
        let actual = example.embedding.len();
        match buffer.dim {
            Some(expected) if expected != actual => {
                return Err(IndexError::DimensionMismatch { expected, actual })
            }
            Some(_) => {}
            None => buffer.dim = Some(actual),
        }
        buffer.next_seq += 1;
        let seq = buffer.next_seq;
        buffer.entries.push(Entry {
            seq,
            norm,
            example: Arc::new(example),
        });
        if buffer.entries.len() < self.capacity {
            return Ok(UpsertOutcome { sealed: false });
        }
        // Sealed while the write lock is held, so a reader sees each entry in exactly
        // one place.
        let sealed = Segment {
            entries: std::mem::take(&mut buffer.entries),
        };
        let mut segments = self.segments.load().as_ref().clone();
        segments.push(Arc::new(sealed));
        self.segments.store(Arc::new(segments));
        Ok(UpsertOutcome { sealed: true })
    }

    pub fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredExample>, IndexError> {
        let (buffered, segments) = {
            let buffer = self.buffer.read();
            match buffer.dim {
                None => return Ok(Vec::new()),
                Some(expected) if expected != embedding.len() => {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: embedding.len(),
                    })
                }
                Some(_) => {}
            }
            (buffer.entries.clone(), self.segments.load_full())
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let latest = latest_by_id(
            segments
                .iter()
                .flat_map(|segment| segment.entries.iter())
                .chain(buffered.iter()),
        );
        let norm_q = l2(embedding);
        let mut scored = latest
            .into_values()
            .map(|entry| ScoredExample {
                score: cosine(embedding, norm_q, &entry.example.embedding, entry.norm),
                example: Arc::clone(&entry.example),
            })
            .collect::<Vec<_>>();
        scored.sort_by(rank);
        scored.truncate(k);
        Ok(scored)
    }

    /// Folds all sealed segments into one, dropping superseded copies. Returns `None` when
    /// there was nothing to do or a seal raced the merge; the next round retries.
    pub fn merge_segments(&self, min_segments: usize) -> Option<MergeOutcome> {
        let current = self.segments.load_full();
        if current.len() < min_segments.max(2) {
            return None;
        }
        let before: usize = current.iter().map(|segment| segment.entries.len()).sum();
        let mut merged = latest_by_id(current.iter().flat_map(|segment| segment.entries.iter()))
            .into_values()
            .cloned()
            .collect::<Vec<_>>();
        merged.sort_by_key(|entry| entry.seq);
        let after = merged.len();

        let _buffer = self.buffer.write();
        if !Arc::ptr_eq(&current, &self.segments.load_full()) {
            return None;
        }
        self.segments
            .store(Arc::new(vec![Arc::new(Segment { entries: merged })]));
        Some(MergeOutcome {
            segments_merged: current.len(),
            superseded_dropped: before - after,
        })
    }

    pub fn len(&self) -> usize {
        let buffer = self.buffer.read();
        let segments = self.segments.load();
        latest_by_id(
            segments
                .iter()
                .flat_map(|segment| segment.entries.iter())
                .chain(buffer.entries.iter()),
        )
        .len()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.load().len()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.read().entries.len()
    }
}

fn latest_by_id<'a>(entries: impl Iterator<Item = &'a Entry>) -> HashMap<&'a ExampleId, &'a Entry> {
    let mut latest: HashMap<&ExampleId, &Entry> = HashMap::new();
    for entry in entries {
        latest
            .entry(&entry.example.id)
            .and_modify(|existing| {
                if entry.seq > existing.seq {
                    *existing = entry;
                }
            })
            .or_insert(entry);
    }
    latest
}

/// Similarity descending, then id ascending. A non-finite score ranks last.
fn rank(a: &ScoredExample, b: &ScoredExample) -> Ordering {
    rank_key(b.score)
        .total_cmp(&rank_key(a.score))
        .then_with(|| a.example.id.cmp(&b.example.id))
}

fn rank_key(score: f32) -> f32 {
    if score.is_finite() {
        score
    } else {
        f32::NEG_INFINITY
    }
}
