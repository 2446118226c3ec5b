//! Scheduler orchestration.
//!
//! [`Scheduler`] is the entry point for producers, workers and health checks.
//! It creates and identifies jobs, answers status queries, records the
//! lifecycle transitions of a running job, and drives the retry state machine
//! when a job's process dies without completing it.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::store::{RedisStore, Store};

use super::job::{due_after, now, Job, JobArgs, JobType, MAX_DELAY};
use super::pool::{KeySpace, Pools};
use super::producer::JobProducer;
use super::queue::Queue;

/// Job scheduler bound to one store and key prefix.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn Store>,
    pools: Pools,
    fault_intervals: Vec<u64>,
}

impl Scheduler {
    /// Creates a scheduler over an existing store.
    pub fn new(store: Arc<dyn Store>, config: &SchedulerConfig) -> Self {
        let pools = Pools::new(store.clone(), KeySpace::new(config.prefix.clone()));
        Self {
            store,
            pools,
            fault_intervals: config.fault_intervals.clone(),
        }
    }

    /// Opens a fresh Redis connection and creates a scheduler over it.
    pub async fn connect(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let store = RedisStore::connect(&config.redis_url).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Returns the pool collection.
    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    /// Returns the fault interval table.
    pub fn fault_intervals(&self) -> &[u64] {
        &self.fault_intervals
    }

    /// Returns a handle for queue `name`.
    pub fn queue(&self, name: &str) -> Queue {
        Queue::new(name, self.pools.clone())
    }

    /// Starts building a job that runs `payload`.
    pub fn job(&self, payload: impl Into<String>) -> JobProducer<'_> {
        JobProducer::new(self, payload)
    }

    // ------------------------------------------------------------------
    // Enqueueing
    // ------------------------------------------------------------------

    /// Enqueues a simple job.
    ///
    /// Returns `Ok(None)` without touching the store when `id` is given and
    /// a job with that id already exists.
    pub async fn enqueue(
        &self,
        payload: &str,
        args: JobArgs,
        queue: &str,
        id: Option<&str>,
    ) -> Result<Option<Job>, SchedulerError> {
        let id = self.resolve_id(id).await?;
        self.create(Job::new(id, queue, payload, args), false).await
    }

    /// Enqueues a job due at unix `timestamp`.
    pub async fn enqueue_at(
        &self,
        timestamp: i64,
        payload: &str,
        args: JobArgs,
        queue: &str,
        id: Option<&str>,
    ) -> Result<Option<Job>, SchedulerError> {
        let id = self.resolve_id(id).await?;
        let job = Job::new(id, queue, payload, args).scheduled_at(timestamp);
        self.create(job, false).await
    }

    /// Enqueues a job due `seconds` from now.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidInterval` if `seconds` exceeds
    /// [`MAX_DELAY`].
    pub async fn enqueue_after(
        &self,
        seconds: u64,
        payload: &str,
        args: JobArgs,
        queue: &str,
        id: Option<&str>,
    ) -> Result<Option<Job>, SchedulerError> {
        let Some(timestamp) = due_after(now(), seconds) else {
            return Err(SchedulerError::InvalidInterval {
                id: id.unwrap_or_default().to_string(),
                interval: seconds,
            });
        };
        self.enqueue_at(timestamp, payload, args, queue, id).await
    }

    /// Creates or replaces a repeatable job running every `interval` seconds.
    ///
    /// An existing record with the same id is always overwritten: its fault
    /// count is reset and its next run is now. The original creation time is
    /// kept.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidInterval` for an interval of 0 or one
    /// above [`MAX_DELAY`], and `SchedulerError::MissingId` for an empty id.
    pub async fn enqueue_each(
        &self,
        interval: u64,
        payload: &str,
        args: JobArgs,
        queue: &str,
        id: &str,
    ) -> Result<Option<Job>, SchedulerError> {
        if id.is_empty() {
            return Err(SchedulerError::MissingId);
        }
        if interval == 0 || interval > MAX_DELAY {
            return Err(SchedulerError::InvalidInterval {
                id: id.to_string(),
                interval,
            });
        }

        if let Some(previous) = self.find(id).await? {
            self.pools
                .job_pool(&previous.queue, previous.job_type)
                .remove(id)
                .await?;
        }
        self.pools.interval(id).delete().await?;

        let job = Job::new(id, queue, payload, args).repeating_every(interval);
        self.create(job, true).await
    }

    async fn resolve_id(&self, id: Option<&str>) -> Result<String, SchedulerError> {
        match id {
            Some("") => Err(SchedulerError::MissingId),
            Some(id) => Ok(id.to_string()),
            None => self.generate_id().await,
        }
    }

    /// Generates a new job id from the store counter.
    pub async fn generate_id(&self) -> Result<String, SchedulerError> {
        let next = self.store.incr(self.pools.counter.key()).await?;
        Ok(next.to_string())
    }

    async fn create(&self, mut job: Job, overwrite: bool) -> Result<Option<Job>, SchedulerError> {
        if !self.save(&mut job, overwrite).await? {
            debug!(job_id = %job.id, "Job already exists, not enqueued");
            return Ok(None);
        }

        self.queue(&job.queue).push(&job).await?;
        info!(job_id = %job.id, queue = %job.queue, job_type = %job.job_type, payload = %job.payload, "Job enqueued");
        Ok(Some(job))
    }

    /// Persists `job`. Without `overwrite` an existing record is left alone
    /// and `false` is returned. `created` is only set on the first save.
    async fn save(&self, job: &mut Job, overwrite: bool) -> Result<bool, SchedulerError> {
        match self.find(&job.id).await? {
            Some(_) if !overwrite => return Ok(false),
            Some(existing) => job.created = existing.created,
            None => job.created = now(),
        }

        self.pools.job_record(&job.id).set(&job.to_json()?).await?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Returns whether a job record with `id` exists.
    pub async fn exists(&self, id: &str) -> Result<bool, SchedulerError> {
        Ok(self.pools.job_record(id).exists().await?)
    }

    /// Loads a job record.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::JobNotFound` if no record exists.
    pub async fn get(&self, id: &str) -> Result<Job, SchedulerError> {
        self.find(id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))
    }

    /// Loads a job record if it exists.
    pub async fn find(&self, id: &str) -> Result<Option<Job>, SchedulerError> {
        match self.pools.job_record(id).get().await? {
            Some(data) => Ok(Some(Job::from_json(&data)?)),
            None => Ok(None),
        }
    }

    /// Removes job `id` from the pool it occupies and, with `with_metadata`,
    /// deletes its record and legacy interval key.
    ///
    /// Returns whether a record existed.
    pub async fn delete(&self, id: &str, with_metadata: bool) -> Result<bool, SchedulerError> {
        let job = self.find(id).await?;
        if let Some(job) = &job {
            self.pools.job_pool(&job.queue, job.job_type).remove(id).await?;
        }

        if with_metadata {
            self.pools.job_record(id).delete().await?;
            self.pools.interval(id).delete().await?;
        }

        Ok(job.is_some())
    }

    /// Pops the next runnable job of `queue`.
    pub async fn pop(&self, queue: &str) -> Result<Option<Job>, SchedulerError> {
        self.queue(queue).pop().await
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Returns whether job `id` is marked as running.
    pub async fn is_executing(&self, id: &str) -> Result<bool, SchedulerError> {
        Ok(self.pools.executing.contains(id).await?)
    }

    /// Returns whether job `id` has completed successfully.
    pub async fn is_completed(&self, id: &str) -> Result<bool, SchedulerError> {
        Ok(self.pools.completed.contains(id).await?)
    }

    /// Returns whether job `id` has failed permanently.
    pub async fn is_failed(&self, id: &str) -> Result<bool, SchedulerError> {
        Ok(self.pools.failed.contains(id).await?)
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Returns the stored result of job `id`, removing it when `clear` is set.
    pub async fn get_result(&self, id: &str, clear: bool) -> Result<Option<Value>, SchedulerError> {
        let key = self.pools.result(id);
        let Some(data) = key.get().await? else {
            return Ok(None);
        };

        if clear {
            key.delete().await?;
        }
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Removes the stored result of job `id`.
    pub async fn clear_result(&self, id: &str) -> Result<bool, SchedulerError> {
        Ok(self.pools.result(id).delete().await?)
    }

    async fn save_result(&self, id: &str, result: Option<&Value>) -> Result<(), SchedulerError> {
        match result {
            None | Some(Value::Null) => Ok(()),
            Some(value) => {
                self.pools
                    .result(id)
                    .set(&serde_json::to_string(value)?)
                    .await?;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle (called from the job process)
    // ------------------------------------------------------------------

    /// Marks job `id` as running in process `pid`.
    pub async fn mark_as_started(&self, id: &str, pid: u32) -> Result<(), SchedulerError> {
        self.pools.executing.add(id, i64::from(pid)).await?;
        Ok(())
    }

    /// Clears the running marker of job `id`.
    pub async fn mark_as_stopped(&self, id: &str) -> Result<(), SchedulerError> {
        self.pools.executing.remove(id).await?;
        Ok(())
    }

    /// Records the successful run of `job`.
    ///
    /// A repeatable job is only unmarked and stays scheduled for its next
    /// run. Any other job is recorded as completed, its metadata is deleted
    /// and a non-null `result` is stored.
    pub async fn mark_as_completed(&self, job: &Job, result: Option<&Value>) -> Result<(), SchedulerError> {
        self.mark_as_stopped(&job.id).await?;
        if job.is_repeatable() {
            return Ok(());
        }

        self.pools.completed.add(&job.id).await?;
        self.pools.job_record(&job.id).delete().await?;
        self.save_result(&job.id, result).await
    }

    // ------------------------------------------------------------------
    // Retry
    // ------------------------------------------------------------------

    /// Reschedules job `id` after its process died without completing it.
    ///
    /// Returns `true` when the job was rescheduled, `false` when it has no
    /// record or was failed permanently.
    pub async fn restore(&self, id: &str) -> Result<bool, SchedulerError> {
        self.pools.executing.remove(id).await?;

        let Some(mut job) = self.find(id).await? else {
            warn!(job_id = %id, "Cannot restore job without metadata");
            return Ok(false);
        };

        let failed_at = now();
        job.record_fault(failed_at);

        let Some(delay) = self.retry_delay(&job) else {
            self.delete(id, true).await?;
            self.pools.failed.add(id).await?;
            warn!(job_id = %id, queue = %job.queue, faults = job.faults, "Job failed permanently");
            return Ok(false);
        };

        let next_run = due_after(failed_at, delay).unwrap_or_else(|| {
            warn!(job_id = %id, delay, "Retry delay out of range, clamping");
            failed_at.saturating_add(MAX_DELAY as i64)
        });
        let original_type = job.job_type;
        if original_type == JobType::Simple {
            job = job.scheduled_at(next_run);
            self.pools.simple(&job.queue).remove(id).await?;
        } else if original_type == JobType::Scheduled {
            job.timestamp = Some(next_run);
        }

        let pool = if job.is_repeatable() {
            self.pools.repeatable(&job.queue)
        } else {
            self.pools.scheduled(&job.queue)
        };
        pool.add(id, next_run).await?;

        self.save(&mut job, true).await?;
        info!(job_id = %id, queue = %job.queue, faults = job.faults, next_run, "Job restored");
        Ok(true)
    }

    /// Delay before the next attempt of a job that has just faulted, or
    /// `None` once a non-repeatable job has exhausted the fault table.
    fn retry_delay(&self, job: &Job) -> Option<u64> {
        let faults = job.faults as usize;
        match self.fault_intervals.last() {
            None if job.is_repeatable() => Some(job.interval.unwrap_or(0)),
            None => Some(0),
            Some(&last) if faults > self.fault_intervals.len() => {
                if job.is_repeatable() {
                    Some(last)
                } else {
                    None
                }
            }
            Some(_) => Some(self.fault_intervals[faults.saturating_sub(1)]),
        }
    }
}
