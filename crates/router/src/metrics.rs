use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tunegate_inference_log::SelectionReason;

#[derive(Clone, Default)]
pub struct RouterMetrics {
    inner: Arc<RouterMetricsInner>,
}

#[derive(Default)]
struct RouterMetricsInner {
    override_selections: AtomicU64,
    affinity_selections: AtomicU64,
    weighted_selections: AtomicU64,
    inferences: AtomicU64,
    backend_errors: AtomicU64,
    timeouts: AtomicU64,
    retrieval_errors: AtomicU64,
    append_retries: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterMetricSnapshot {
    pub override_selections: u64,
    pub affinity_selections: u64,
    pub weighted_selections: u64,
    pub inferences: u64,
    pub backend_errors: u64,
    pub timeouts: u64,
    pub retrieval_errors: u64,
    pub append_retries: u64,
}

impl RouterMetrics {
    pub fn record_selection(&self, reason: SelectionReason) {
        let counter = match reason {
            SelectionReason::Override => &self.inner.override_selections,
            SelectionReason::EpisodeAffinity => &self.inner.affinity_selections,
            SelectionReason::Weighted => &self.inner.weighted_selections,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference(&self) {
        self.inner.inferences.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_error(&self) {
        self.inner.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retrieval_error(&self) {
        self.inner.retrieval_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_append_retry(&self) {
        self.inner.append_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterMetricSnapshot {
        RouterMetricSnapshot {
            override_selections: self.inner.override_selections.load(Ordering::Relaxed),
            affinity_selections: self.inner.affinity_selections.load(Ordering::Relaxed),
            weighted_selections: self.inner.weighted_selections.load(Ordering::Relaxed),
            inferences: self.inner.inferences.load(Ordering::Relaxed),
            backend_errors: self.inner.backend_errors.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            retrieval_errors: self.inner.retrieval_errors.load(Ordering::Relaxed),
            append_retries: self.inner.append_retries.load(Ordering::Relaxed),
        }
    }
}
