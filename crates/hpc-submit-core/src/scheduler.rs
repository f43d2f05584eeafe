//! Scheduler seam.

use async_trait::async_trait;

use crate::error::SubmitResult;

/// A batch system that accepts a rendered script.
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Submit `script` and return the scheduler's job id.
    async fn submit(&self, script: &str) -> SubmitResult<String>;

    /// Human-readable scheduler name.
    fn name(&self) -> &str;
}
