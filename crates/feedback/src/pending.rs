use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tunegate_core_types::InferenceId;
use tunegate_inference_log::FeedbackRecord;

struct Parked {
    record: FeedbackRecord,
    expires_at: Instant,
}

/// Feedback that arrived before its inference was written.
///
/// A slot is reserved before the feedback is claimed and logged, so parking never fails
/// once the record exists. Entries older than `ttl` are dropped to make room.
pub(crate) struct PendingFeedback {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<PendingInner>,
}

#[derive(Default)]
struct PendingInner {
    by_inference: HashMap<InferenceId, Vec<Parked>>,
    len: usize,
    reserved: usize,
}

impl PendingInner {
    fn evict_expired(&mut self, now: Instant) -> Vec<FeedbackRecord> {
        let mut evicted = Vec::new();
        self.by_inference.retain(|_, parked| {
            let mut i = 0;
            while i < parked.len() {
                if parked[i].expires_at <= now {
                    evicted.push(parked.swap_remove(i).record);
                } else {
                    i += 1;
                }
            }
            !parked.is_empty()
        });
        self.len -= evicted.len();
        evicted
    }
}

/// A held pending slot. Consumed by [`PendingFeedback::park`] or returned with
/// [`PendingFeedback::cancel`].
#[must_use]
pub(crate) struct Reservation(());

impl PendingFeedback {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(PendingInner::default()),
        }
    }

    /// Holds one slot, evicting expired entries first when the queue looks full.
    /// Returns the evicted records alongside the outcome so the caller can free their keys.
    pub fn reserve(&self) -> (Option<Reservation>, Vec<FeedbackRecord>) {
        let mut inner = self.inner.lock();
        let mut evicted = Vec::new();
        if inner.len + inner.reserved >= self.capacity {
            evicted = inner.evict_expired(Instant::now());
        }
        if inner.len + inner.reserved >= self.capacity {
            return (None, evicted);
        }
        inner.reserved += 1;
        (Some(Reservation(())), evicted)
    }

    pub fn cancel(&self, _slot: Reservation) {
        let mut inner = self.inner.lock();
        inner.reserved -= 1;
    }

    pub fn park(&self, _slot: Reservation, inference: InferenceId, record: FeedbackRecord) {
        let mut inner = self.inner.lock();
        inner.reserved -= 1;
        inner.len += 1;
        inner.by_inference.entry(inference).or_default().push(Parked {
            record,
            expires_at: Instant::now() + self.ttl,
        });
    }

    pub fn take(&self, inference: &InferenceId) -> Vec<FeedbackRecord> {
        let mut inner = self.inner.lock();
        match inner.by_inference.remove(inference) {
            Some(parked) => {
                inner.len -= parked.len();
                parked.into_iter().map(|p| p.record).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn evict_expired(&self) -> Vec<FeedbackRecord> {
        self.inner.lock().evict_expired(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tunegate_core_types::FeedbackId;
    use tunegate_inference_log::{FeedbackTarget, FeedbackValue};

    fn record(inference: &InferenceId) -> FeedbackRecord {
        FeedbackRecord {
            id: FeedbackId::new(),
            target: FeedbackTarget::Inference(inference.clone()),
            metric: "intent_accuracy".into(),
            value: FeedbackValue::Boolean(true),
            idempotency_key: format!("{inference}:intent_accuracy"),
            ts: Utc::now(),
        }
    }

    #[test]
    fn reservations_count_against_capacity() {
        let pending = PendingFeedback::new(1, Duration::from_secs(60));
        let (slot, _) = pending.reserve();
        let slot = slot.expect("first slot");
        assert!(pending.reserve().0.is_none());
        pending.cancel(slot);
        assert!(pending.reserve().0.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_make_room() {
        let pending = PendingFeedback::new(1, Duration::from_secs(30));
        let orphan = InferenceId::new();
        let (slot, _) = pending.reserve();
        pending.park(slot.expect("slot"), orphan.clone(), record(&orphan));
        assert!(pending.reserve().0.is_none());

        tokio::time::advance(Duration::from_secs(31)).await;
        let (slot, evicted) = pending.reserve();
        assert!(slot.is_some());
        assert_eq!(evicted.len(), 1);
        assert_eq!(pending.len(), 0);
        assert!(pending.take(&orphan).is_empty());
    }
}
