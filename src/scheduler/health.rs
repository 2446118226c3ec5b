//! Health checks.
//!
//! Reconciles the pid pools and the executing pool against live OS
//! processes. A job whose owning process is gone is restored through the
//! retry state machine. Liveness is a signal-0 probe, so a recycled pid
//! keeps a dead entry alive until the new process exits.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;

use super::core::Scheduler;
use super::job::Job;
use super::pool::SetPool;
use super::process::is_alive;

/// Findings of one health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Dead pids removed from per-worker child pools.
    pub dead_children: usize,
    /// Dead pids removed from the worker pool.
    pub dead_workers: usize,
    /// Executing jobs whose process was gone.
    pub stopped_jobs: usize,
    /// Stopped jobs that were rescheduled.
    pub restored_jobs: usize,
}

impl HealthReport {
    /// Returns true when the check found nothing to repair.
    pub fn is_healthy(&self) -> bool {
        self.dead_children == 0 && self.dead_workers == 0 && self.stopped_jobs == 0
    }
}

/// Health checker bound to a scheduler.
pub struct Health<'a> {
    scheduler: &'a Scheduler,
}

impl<'a> Health<'a> {
    pub fn new(scheduler: &'a Scheduler) -> Self {
        Self { scheduler }
    }

    /// Removes dead pids from every worker's child pool.
    pub async fn check_dead_children(&self) -> Result<usize, SchedulerError> {
        let mut removed = 0;
        for pool in self.scheduler.pools().all_children().await? {
            removed += check_pid_pool(&pool).await?;
        }
        Ok(removed)
    }

    /// Removes dead pids from the worker pool.
    pub async fn check_dead_workers(&self) -> Result<usize, SchedulerError> {
        check_pid_pool(&self.scheduler.pools().pids).await
    }

    /// Restores executing jobs whose process is gone.
    ///
    /// Returns `(stopped, restored)`.
    pub async fn check_stopped_jobs(&self) -> Result<(usize, usize), SchedulerError> {
        let mut stopped = 0;
        let mut restored = 0;

        for (id, pid) in self.scheduler.pools().executing.entries().await? {
            if u32::try_from(pid).map(is_alive).unwrap_or(false) {
                continue;
            }

            stopped += 1;
            warn!(job_id = %id, pid, "Executing job lost its process");
            if self.scheduler.restore(&id).await? {
                restored += 1;
            }
        }

        Ok((stopped, restored))
    }

    /// Runs all checks.
    pub async fn check(&self) -> Result<HealthReport, SchedulerError> {
        let dead_children = self.check_dead_children().await?;
        let dead_workers = self.check_dead_workers().await?;
        let (stopped_jobs, restored_jobs) = self.check_stopped_jobs().await?;

        let report = HealthReport {
            dead_children,
            dead_workers,
            stopped_jobs,
            restored_jobs,
        };
        info!(
            dead_children,
            dead_workers,
            stopped_jobs,
            restored_jobs,
            healthy = report.is_healthy(),
            "Health check finished"
        );
        Ok(report)
    }

    /// Deletes job records that are neither executing nor present in the
    /// pool their type and queue designate.
    ///
    /// A record is only deleted if it is still lost after `grace`, so that
    /// jobs between pop and start are not mistaken for lost ones. Returns the
    /// deleted ids.
    pub async fn check_lost_jobs(&self, grace: Duration) -> Result<Vec<String>, SchedulerError> {
        let pools = self.scheduler.pools();
        let keys = self.scheduler.store().keys(&pools.keys().job_pattern()).await?;

        let mut suspects = Vec::new();
        for key in &keys {
            let Some(id) = pools.keys().job_id_from_key(key) else {
                continue;
            };
            if self.is_lost(id).await? {
                suspects.push(id.to_string());
            }
        }

        if suspects.is_empty() {
            return Ok(suspects);
        }

        debug!(count = suspects.len(), "Rechecking lost job candidates");
        tokio::time::sleep(grace).await;

        let mut deleted = Vec::new();
        for id in suspects {
            if !self.is_lost(&id).await? {
                continue;
            }
            pools.job_record(&id).delete().await?;
            pools.interval(&id).delete().await?;
            warn!(job_id = %id, "Deleted job missing from its pool");
            deleted.push(id);
        }
        Ok(deleted)
    }

    async fn is_lost(&self, id: &str) -> Result<bool, SchedulerError> {
        let pools = self.scheduler.pools();
        let Some(data) = pools.job_record(id).get().await? else {
            return Ok(false);
        };

        let job = match Job::from_json(&data) {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Unreadable job record");
                return Ok(true);
            }
        };

        if self.scheduler.is_executing(id).await? {
            return Ok(false);
        }
        Ok(!pools.job_pool(&job.queue, job.job_type).contains(id).await?)
    }
}

/// Removes pids of dead processes from `pool`. Returns how many were removed.
async fn check_pid_pool(pool: &SetPool) -> Result<usize, SchedulerError> {
    let mut removed = 0;
    for member in pool.members().await? {
        if member.parse::<u32>().map(is_alive).unwrap_or(false) {
            continue;
        }
        pool.remove(&member).await?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SchedulerConfig;
    use crate::scheduler::job::{JobArgs, JobType};
    use crate::scheduler::process::current_pid;
    use crate::store::MemoryStore;

    fn scheduler() -> Scheduler {
        Scheduler::new(
            Arc::new(MemoryStore::new()),
            &SchedulerConfig::default().with_prefix("test"),
        )
    }

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[tokio::test]
    async fn test_consistent_state_is_healthy() {
        let scheduler = scheduler();
        let live = current_pid().to_string();
        scheduler.pools().pids.add(&live).await.unwrap();
        scheduler.pools().children(current_pid()).add(&live).await.unwrap();
        scheduler.mark_as_started("1", current_pid()).await.unwrap();

        let report = Health::new(&scheduler).check().await.unwrap();

        assert_eq!(report, HealthReport::default());
        assert!(report.is_healthy());
        assert!(scheduler.is_executing("1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dead_pids_are_removed() {
        let scheduler = scheduler();
        let dead = dead_pid().to_string();
        let live = current_pid().to_string();

        scheduler.pools().pids.add(&dead).await.unwrap();
        scheduler.pools().pids.add(&live).await.unwrap();
        scheduler.pools().children(1).add(&dead).await.unwrap();
        scheduler.pools().children(2).add("garbage").await.unwrap();

        let health = Health::new(&scheduler);
        assert_eq!(health.check_dead_workers().await.unwrap(), 1);
        assert_eq!(health.check_dead_children().await.unwrap(), 2);

        assert_eq!(scheduler.pools().pids.members().await.unwrap(), vec![live]);
        assert_eq!(scheduler.pools().children(1).len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stopped_job_is_restored() {
        let scheduler = scheduler();
        scheduler
            .enqueue("return", JobArgs::new(), "default", Some("1"))
            .await
            .unwrap();
        scheduler.pop("default").await.unwrap();
        scheduler.mark_as_started("1", dead_pid()).await.unwrap();

        let report = Health::new(&scheduler).check().await.unwrap();

        assert_eq!(report.stopped_jobs, 1);
        assert_eq!(report.restored_jobs, 1);
        assert!(!report.is_healthy());

        let job = scheduler.get("1").await.unwrap();
        assert_eq!(job.faults, 1);
        assert_eq!(job.job_type, JobType::Scheduled);
        assert!(!scheduler.is_executing("1").await.unwrap());

        assert!(Health::new(&scheduler).check().await.unwrap().is_healthy());
    }

    #[tokio::test]
    async fn test_stopped_job_past_budget_fails() {
        let config = SchedulerConfig::default()
            .with_prefix("test")
            .with_fault_intervals(vec![1]);
        let scheduler = Scheduler::new(Arc::new(MemoryStore::new()), &config);
        scheduler
            .enqueue("return", JobArgs::new(), "default", Some("1"))
            .await
            .unwrap();

        let health = Health::new(&scheduler);
        scheduler.mark_as_started("1", dead_pid()).await.unwrap();
        assert_eq!(health.check_stopped_jobs().await.unwrap(), (1, 1));

        scheduler.mark_as_started("1", dead_pid()).await.unwrap();
        assert_eq!(health.check_stopped_jobs().await.unwrap(), (1, 0));

        assert!(scheduler.is_failed("1").await.unwrap());
        assert!(!scheduler.exists("1").await.unwrap());
    }

    #[tokio::test]
    async fn test_lost_jobs_are_deleted() {
        let scheduler = scheduler();
        scheduler
            .enqueue("return", JobArgs::new(), "default", Some("queued"))
            .await
            .unwrap();
        scheduler
            .enqueue("return", JobArgs::new(), "default", Some("running"))
            .await
            .unwrap();
        scheduler
            .enqueue("return", JobArgs::new(), "default", Some("lost"))
            .await
            .unwrap();

        scheduler.pools().simple("default").remove("running").await.unwrap();
        scheduler.mark_as_started("running", current_pid()).await.unwrap();
        scheduler.pools().simple("default").remove("lost").await.unwrap();
        scheduler
            .pools()
            .job_record("corrupt")
            .set("not json")
            .await
            .unwrap();

        let mut deleted = Health::new(&scheduler)
            .check_lost_jobs(Duration::from_millis(10))
            .await
            .unwrap();
        deleted.sort();

        assert_eq!(deleted, vec!["corrupt", "lost"]);
        assert!(scheduler.exists("queued").await.unwrap());
        assert!(scheduler.exists("running").await.unwrap());
        assert!(!scheduler.exists("lost").await.unwrap());
        assert!(!scheduler.exists("corrupt").await.unwrap());
    }

    #[tokio::test]
    async fn test_lost_job_recovered_during_grace_is_kept() {
        let scheduler = scheduler();
        scheduler
            .enqueue("return", JobArgs::new(), "default", Some("1"))
            .await
            .unwrap();
        scheduler.pop("default").await.unwrap();

        let checker = scheduler.clone();
        let scan = tokio::spawn(async move {
            Health::new(&checker)
                .check_lost_jobs(Duration::from_millis(200))
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.mark_as_started("1", current_pid()).await.unwrap();

        assert!(scan.await.unwrap().is_empty());
        assert!(scheduler.exists("1").await.unwrap());
    }
}
