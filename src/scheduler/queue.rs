//! Per-queue facade over the three job pools.
//!
//! A queue name maps to three pools in the store:
//!
//! - `queue:<name>:simple`: unordered set, popped in arbitrary order
//! - `queue:<name>:scheduled`: sorted set scored by due timestamp
//! - `queue:<name>:repeatable`: sorted set scored by next run timestamp
//!
//! [`Queue::pop`] prefers due scheduled jobs, then due repeatable jobs, then
//! simple jobs.
//!
//! # Concurrent pollers
//!
//! Peeking the earliest due id and removing it are two store calls. For
//! scheduled jobs the removal result decides the winner: a poller whose
//! `ZREM` removed nothing lost the race and reports no hit. Repeatable jobs
//! are re-scored rather than removed, so two pollers can both claim the same
//! run; delivery of repeatable runs is at-least-once.

use tracing::{debug, warn};

use crate::error::SchedulerError;

use super::job::{due_after, now, Job, JobType};
use super::pool::Pools;

/// A named queue.
#[derive(Clone)]
pub struct Queue {
    name: String,
    pools: Pools,
}

impl Queue {
    /// Creates a handle for queue `name`.
    pub fn new(name: impl Into<String>, pools: Pools) -> Self {
        Self {
            name: name.into(),
            pools,
        }
    }

    /// Returns the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts an already saved job into the pool its type designates.
    ///
    /// Scheduled jobs are scored by their due timestamp (now when missing),
    /// repeatable jobs are due immediately.
    pub async fn push(&self, job: &Job) -> Result<(), SchedulerError> {
        if job.queue != self.name {
            return Err(SchedulerError::WrongQueue {
                id: job.id.clone(),
                job_queue: job.queue.clone(),
                queue: self.name.clone(),
            });
        }

        match job.job_type {
            JobType::Simple => {
                self.pools.simple(&self.name).add(&job.id).await?;
            }
            JobType::Scheduled => {
                let due = job.timestamp.unwrap_or_else(now);
                self.pools.scheduled(&self.name).add(&job.id, due).await?;
            }
            JobType::Repeatable => {
                self.pools.repeatable(&self.name).add(&job.id, now()).await?;
            }
        }

        debug!(job_id = %job.id, queue = %self.name, job_type = %job.job_type, "Job pushed");
        Ok(())
    }

    /// Pops the next runnable job: scheduled, then repeatable, then simple.
    pub async fn pop(&self) -> Result<Option<Job>, SchedulerError> {
        if let Some(job) = self.pop_scheduled().await? {
            return Ok(Some(job));
        }
        if let Some(job) = self.pop_repeatable().await? {
            return Ok(Some(job));
        }
        self.pop_simple().await
    }

    /// Removes and returns the earliest due scheduled job.
    pub async fn pop_scheduled(&self) -> Result<Option<Job>, SchedulerError> {
        let pool = self.pools.scheduled(&self.name);
        let Some(id) = pool.first_due(now()).await? else {
            return Ok(None);
        };

        if !pool.remove(&id).await? {
            debug!(job_id = %id, queue = %self.name, "Scheduled job claimed by another poller");
            return Ok(None);
        }

        self.load(&id).await
    }

    /// Returns the earliest due repeatable job and re-scores it to its next run.
    pub async fn pop_repeatable(&self) -> Result<Option<Job>, SchedulerError> {
        let pool = self.pools.repeatable(&self.name);
        let current = now();
        let Some(id) = pool.first_due(current).await? else {
            return Ok(None);
        };

        let Some(job) = self.load(&id).await? else {
            pool.remove(&id).await?;
            return Ok(None);
        };

        let interval = match job.interval {
            Some(interval) => Some(interval),
            None => self.legacy_interval(&id).await?,
        };

        let next_run = interval
            .filter(|&interval| interval > 0)
            .and_then(|interval| due_after(current, interval));

        match next_run {
            Some(next_run) => {
                pool.add(&id, next_run).await?;
                Ok(Some(job))
            }
            None => {
                warn!(job_id = %id, queue = %self.name, interval = ?interval, "Repeatable job has no usable interval, dropping it from its pool");
                pool.remove(&id).await?;
                Ok(None)
            }
        }
    }

    /// Removes and returns an arbitrary simple job.
    pub async fn pop_simple(&self) -> Result<Option<Job>, SchedulerError> {
        let Some(id) = self.pools.simple(&self.name).pop().await? else {
            return Ok(None);
        };
        self.load(&id).await
    }

    async fn load(&self, id: &str) -> Result<Option<Job>, SchedulerError> {
        match self.pools.job_record(id).get().await? {
            Some(data) => Ok(Some(Job::from_json(&data)?)),
            None => {
                warn!(job_id = %id, queue = %self.name, "Popped job has no metadata");
                Ok(None)
            }
        }
    }

    async fn legacy_interval(&self, id: &str) -> Result<Option<u64>, SchedulerError> {
        let value = self.pools.interval(id).get().await?;
        Ok(value.and_then(|v| v.trim().parse().ok()))
    }
}
