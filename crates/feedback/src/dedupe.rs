use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tunegate_core_types::FeedbackId;

/// Idempotency keys seen so far, mapped to the feedback that claimed them.
/// Unbounded: a forgotten key would let a late replay count twice.
#[derive(Default)]
pub(crate) struct IdempotencyIndex {
    keys: DashMap<String, FeedbackId>,
}

impl IdempotencyIndex {
    pub fn owner(&self, key: &str) -> Option<FeedbackId> {
        self.keys.get(key).map(|entry| entry.value().clone())
    }

    /// Atomically claims `key` for `id`. Returns the existing owner when already taken.
    pub fn claim(&self, key: &str, id: &FeedbackId) -> Result<(), FeedbackId> {
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
                Ok(())
            }
        }
    }

    pub fn release(&self, key: &str) {
        self.keys.remove(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}
