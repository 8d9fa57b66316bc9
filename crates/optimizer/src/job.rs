use async_trait::async_trait;
use tunegate_core_types::JobId;

use crate::errors::JobError;
use crate::model::{JobStatus, TrainingWindow};

/// External worker that rewrites prompts, fine-tunes, or re-weights. Opaque beyond
/// start and poll.
#[async_trait]
pub trait OptimizationJobRunner: Send + Sync {
    async fn start(
        &self,
        function: &str,
        metric: &str,
        window: TrainingWindow,
    ) -> Result<JobId, JobError>;

    async fn poll_status(&self, job: &JobId) -> Result<JobStatus, JobError>;
}
