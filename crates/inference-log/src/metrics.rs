use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct LogMetrics {
    inner: Arc<LogMetricsInner>,
}

#[derive(Default)]
struct LogMetricsInner {
    inferences: AtomicU64,
    feedback: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    cold_errors: AtomicU64,
    cold_pending: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogMetricSnapshot {
    pub inferences: u64,
    pub feedback: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub cold_errors: u64,
    pub cold_pending: u64,
}

impl LogMetrics {
    pub fn record_inference(&self) {
        self.inner.inferences.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feedback(&self) {
        self.inner.feedback.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.inner.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cold_error(&self) {
        self.inner.cold_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cold_queue_inc(&self) {
        self.inner.cold_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cold_queue_dec(&self) {
        let _ = self
            .inner
            .cold_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| {
                prev.checked_sub(1)
            });
    }

    pub fn snapshot(&self) -> LogMetricSnapshot {
        LogMetricSnapshot {
            inferences: self.inner.inferences.load(Ordering::Relaxed),
            feedback: self.inner.feedback.load(Ordering::Relaxed),
            duplicates: self.inner.duplicates.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            cold_errors: self.inner.cold_errors.load(Ordering::Relaxed),
            cold_pending: self.inner.cold_pending.load(Ordering::Relaxed),
        }
    }
}
