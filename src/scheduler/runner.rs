//! Job execution inside the job process.
//!
//! The worker launches one process per job; that process connects to the
//! store on its own and hands the job id to [`JobRunner::run`]. A run that
//! returns an error leaves the executing marker in place; the process then
//! exits non-zero and the worker restores the job when it reaps it.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{PayloadError, SchedulerError};

use super::core::Scheduler;
use super::payload::{JobContext, PayloadRegistry};

/// Errors that can occur while running a job.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Runs single jobs against a scheduler and payload registry.
pub struct JobRunner<'a> {
    scheduler: &'a Scheduler,
    registry: &'a PayloadRegistry,
}

impl<'a> JobRunner<'a> {
    pub fn new(scheduler: &'a Scheduler, registry: &'a PayloadRegistry) -> Self {
        Self {
            scheduler,
            registry,
        }
    }

    /// Runs job `id` in process `pid` and records its completion.
    ///
    /// Returns the payload result.
    pub async fn run(&self, id: &str, pid: u32) -> Result<Option<Value>, RunError> {
        let job = self.scheduler.get(id).await?;
        let ctx = JobContext::from_job(&job);

        self.scheduler.mark_as_started(&job.id, pid).await?;
        debug!(job_id = %job.id, queue = %job.queue, payload = %job.payload, pid, "Job started");

        let mut payload = self.registry.create(&job.payload, job.args.clone())?;
        let result = payload
            .run(&ctx)
            .await
            .map_err(PayloadError::Failed)?;

        self.scheduler.mark_as_completed(&job, result.as_ref()).await?;
        info!(job_id = %job.id, queue = %job.queue, payload = %job.payload, "Job done");
        Ok(result)
    }
}
