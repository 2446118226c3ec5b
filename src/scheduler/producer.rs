//! Fluent job builder.
//!
//! ```rust,ignore
//! scheduler
//!     .job("append")
//!     .into_queue("files")
//!     .with_args(args)
//!     .run_after(60)
//!     .enqueue()
//!     .await?;
//! ```

use crate::config::DEFAULT_QUEUE;
use crate::error::SchedulerError;

use super::core::Scheduler;
use super::job::{Job, JobArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timing {
    Now,
    At(i64),
    After(u64),
    Each(u64),
}

/// Builds a job and dispatches it to the matching enqueue operation.
pub struct JobProducer<'a> {
    scheduler: &'a Scheduler,
    payload: String,
    queue: String,
    args: JobArgs,
    id: Option<String>,
    timing: Timing,
}

impl<'a> JobProducer<'a> {
    pub(crate) fn new(scheduler: &'a Scheduler, payload: impl Into<String>) -> Self {
        Self {
            scheduler,
            payload: payload.into(),
            queue: DEFAULT_QUEUE.to_string(),
            args: JobArgs::new(),
            id: None,
            timing: Timing::Now,
        }
    }

    /// Puts the job into `queue` instead of the default queue.
    pub fn into_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_args(mut self, args: JobArgs) -> Self {
        self.args = args;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Runs the job once at unix `timestamp`.
    pub fn run_at(mut self, timestamp: i64) -> Self {
        self.timing = Timing::At(timestamp);
        self
    }

    /// Runs the job once, `seconds` from now.
    pub fn run_after(mut self, seconds: u64) -> Self {
        self.timing = Timing::After(seconds);
        self
    }

    /// Runs the job every `seconds`. Requires an id.
    pub fn run_each(mut self, seconds: u64) -> Self {
        self.timing = Timing::Each(seconds);
        self
    }

    /// Enqueues the job. Returns `None` if a non-repeatable job with the
    /// same id already exists.
    pub async fn enqueue(self) -> Result<Option<Job>, SchedulerError> {
        let scheduler = self.scheduler;
        let id = self.id.as_deref();
        match self.timing {
            Timing::Now => {
                scheduler
                    .enqueue(&self.payload, self.args, &self.queue, id)
                    .await
            }
            Timing::At(timestamp) => {
                scheduler
                    .enqueue_at(timestamp, &self.payload, self.args, &self.queue, id)
                    .await
            }
            Timing::After(seconds) => {
                scheduler
                    .enqueue_after(seconds, &self.payload, self.args, &self.queue, id)
                    .await
            }
            Timing::Each(interval) => {
                let id = id.ok_or(SchedulerError::MissingId)?;
                scheduler
                    .enqueue_each(interval, &self.payload, self.args, &self.queue, id)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::config::SchedulerConfig;
    use crate::scheduler::job::{now, JobType};
    use crate::store::MemoryStore;

    use super::*;

    fn scheduler() -> Scheduler {
        Scheduler::new(Arc::new(MemoryStore::new()), &SchedulerConfig::default())
    }

    #[tokio::test]
    async fn test_defaults_to_simple_job_in_default_queue() {
        let scheduler = scheduler();

        let job = scheduler.job("return").enqueue().await.unwrap().unwrap();

        assert_eq!(job.queue, DEFAULT_QUEUE);
        assert_eq!(job.job_type, JobType::Simple);
        assert!(job.args.is_empty());
    }

    #[tokio::test]
    async fn test_builds_scheduled_job() {
        let scheduler = scheduler();
        let args = json!({"value": 3}).as_object().cloned().unwrap();

        let before = now();
        let job = scheduler
            .job("return")
            .into_queue("mail")
            .with_args(args)
            .with_id("later")
            .run_after(30)
            .enqueue()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(job.id, "later");
        assert_eq!(job.queue, "mail");
        assert_eq!(job.job_type, JobType::Scheduled);
        assert!(job.timestamp.unwrap() >= before + 30);
        assert_eq!(job.args["value"], json!(3));
    }

    #[tokio::test]
    async fn test_run_each_requires_id() {
        let scheduler = scheduler();

        let err = scheduler.job("return").run_each(10).enqueue().await.unwrap_err();
        assert!(matches!(err, SchedulerError::MissingId));

        let job = scheduler
            .job("return")
            .with_id("tick")
            .run_each(10)
            .enqueue()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.interval, Some(10));
    }
}
