use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct OptimizerMetrics {
    inner: Arc<OptimizerMetricsInner>,
}

#[derive(Default)]
struct OptimizerMetricsInner {
    evaluations: AtomicU64,
    triggers: AtomicU64,
    jobs_started: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    publishes_rejected: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptimizerMetricSnapshot {
    pub evaluations: u64,
    pub triggers: u64,
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub publishes_rejected: u64,
}

impl OptimizerMetrics {
    pub fn record_evaluation(&self, triggered: bool) {
        self.inner.evaluations.fetch_add(1, Ordering::Relaxed);
        if triggered {
            self.inner.triggers.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_job_started(&self) {
        self.inner.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_finished(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.inner.jobs_succeeded
        } else {
            &self.inner.jobs_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_rejected(&self) {
        self.inner.publishes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OptimizerMetricSnapshot {
        OptimizerMetricSnapshot {
            evaluations: self.inner.evaluations.load(Ordering::Relaxed),
            triggers: self.inner.triggers.load(Ordering::Relaxed),
            jobs_started: self.inner.jobs_started.load(Ordering::Relaxed),
            jobs_succeeded: self.inner.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.inner.jobs_failed.load(Ordering::Relaxed),
            publishes_rejected: self.inner.publishes_rejected.load(Ordering::Relaxed),
        }
    }
}
