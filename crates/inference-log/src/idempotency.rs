use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

/// Bounded tracker of recently appended entry ids.
#[derive(Debug)]
pub struct IdempotencyTracker {
    inner: Mutex<TrackerInner>,
}

#[derive(Debug)]
struct TrackerInner {
    capacity: usize,
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl Default for IdempotencyTracker {
    fn default() -> Self {
        Self::with_capacity(1_024)
    }
}

impl IdempotencyTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                capacity,
                order: VecDeque::with_capacity(capacity.min(1_048_576)),
                keys: HashSet::with_capacity(capacity.min(1_048_576)),
            }),
        }
    }

    /// Returns true if the key is newly accepted.
    pub fn accept(&self, key: &str) -> bool {
        let mut guard = self.inner.lock();
        if guard.keys.contains(key) {
            return false;
        }
        guard.keys.insert(key.to_owned());
        guard.order.push_back(key.to_owned());
        if guard.order.len() > guard.capacity {
            if let Some(old) = guard.order.pop_front() {
                guard.keys.remove(&old);
            }
        }
        true
    }

    /// Forgets a key whose append did not go through, so a retry is not mistaken for a replay.
    pub fn release(&self, key: &str) {
        let mut guard = self.inner.lock();
        if guard.keys.remove(key) {
            guard.order.retain(|existing| existing != key);
        }
    }
}
