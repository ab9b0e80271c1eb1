//! Ports implemented outside the core crate.

use crate::context::JobContext;
use crate::error::Result;
use crate::instance::JobInstance;
use crate::pipeline::StepDefinition;
use crate::report::JobRecord;
use async_trait::async_trait;

/// Executes one job instance as an ordered sequence of steps.
///
/// `steps` is the subset the conditional gate selected for this dispatch; it
/// may differ from `instance.steps` when per-step ref conditions apply. The
/// executor owns no shared state: it writes only its own record.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run_job(
        &self,
        instance: &JobInstance,
        steps: &[StepDefinition],
        ctx: JobContext,
    ) -> Result<JobRecord>;
}
