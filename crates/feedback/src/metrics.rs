use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct FeedbackMetrics {
    inner: Arc<FeedbackMetricsInner>,
}

#[derive(Default)]
struct FeedbackMetricsInner {
    applied: AtomicU64,
    duplicates: AtomicU64,
    deferred: AtomicU64,
    deferred_applied: AtomicU64,
    rejected: AtomicU64,
    expired: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedbackMetricSnapshot {
    pub applied: u64,
    pub duplicates: u64,
    pub deferred: u64,
    pub deferred_applied: u64,
    pub rejected: u64,
    pub expired: u64,
}

impl FeedbackMetrics {
    pub fn record_applied(&self) {
        self.inner.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.inner.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.inner.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred_applied(&self) {
        self.inner.deferred_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: usize) {
        self.inner.expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedbackMetricSnapshot {
        FeedbackMetricSnapshot {
            applied: self.inner.applied.load(Ordering::Relaxed),
            duplicates: self.inner.duplicates.load(Ordering::Relaxed),
            deferred: self.inner.deferred.load(Ordering::Relaxed),
            deferred_applied: self.inner.deferred_applied.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            expired: self.inner.expired.load(Ordering::Relaxed),
        }
    }
}
