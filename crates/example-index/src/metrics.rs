use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct IndexMetrics {
    inner: Arc<IndexMetricsInner>,
}

#[derive(Default)]
struct IndexMetricsInner {
    upserts: AtomicU64,
    rejected: AtomicU64,
    queries: AtomicU64,
    seals: AtomicU64,
    compactions: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexMetricSnapshot {
    pub upserts: u64,
    pub rejected: u64,
    pub queries: u64,
    pub seals: u64,
    pub compactions: u64,
}

impl IndexMetrics {
    pub fn record_upsert(&self, sealed: bool) {
        self.inner.upserts.fetch_add(1, Ordering::Relaxed);
        if sealed {
            self.inner.seals.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.inner.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.inner.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IndexMetricSnapshot {
        IndexMetricSnapshot {
            upserts: self.inner.upserts.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            queries: self.inner.queries.load(Ordering::Relaxed),
            seals: self.inner.seals.load(Ordering::Relaxed),
            compactions: self.inner.compactions.load(Ordering::Relaxed),
        }
    }
}
