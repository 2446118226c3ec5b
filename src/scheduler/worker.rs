//! Worker process main loop.
//!
//! A [`Worker`] owns a set of queues and runs their jobs, each in its own
//! process, with at most `threads` jobs in flight:
//!
//! ```text
//!   initializing ──▶ running ──(shutdown)──▶ draining ──▶ terminated
//!                    │    ▲
//!           pop/launch    reap: restore on crash
//! ```
//!
//! While running, the loop polls the queues round-robin, starting after the
//! queue that produced the previous job. With every slot taken it blocks
//! until a job process exits; with nothing to run it waits one poll interval.
//! Either wait ends early on shutdown.
//!
//! A reaped job is restored when its process exited unsuccessfully or left
//! the job marked as executing.

use std::collections::HashMap;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::SchedulerError;

use super::core::Scheduler;
use super::job::Job;
use super::launcher::{JobLauncher, LaunchedJob};
use super::process::{current_pid, is_alive, listen_for_shutdown};

/// Errors that can occur while running a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Another live worker owns the queue.
    #[error("Queue '{queue}' is already watched by worker {pid}")]
    QueueAlreadyWatched { queue: String, pid: u32 },

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Installing the signal listener failed.
    #[error("Failed to listen for signals: {0}")]
    Signal(#[source] io::Error),

    #[error("Worker has no queues to watch")]
    NoQueues,
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Running,
    Draining,
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Initializing => "initializing",
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives worker state updates, e.g. to set a process title.
pub trait WorkerObserver: Send + Sync {
    fn state_changed(&self, state: WorkerState, queues: &[String], message: &str);
}

/// Observer logging every update through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl WorkerObserver for TracingObserver {
    fn state_changed(&self, state: WorkerState, queues: &[String], message: &str) {
        let queues = queues.join(",");
        match state {
            WorkerState::Running => debug!(state = %state, queues = %queues, "{}", message),
            _ => info!(state = %state, queues = %queues, "{}", message),
        }
    }
}

/// Exit of one job process.
struct ChildExit {
    pid: u32,
    job_id: String,
    status: io::Result<ExitStatus>,
}

/// Runs jobs from a fixed set of queues.
pub struct Worker {
    scheduler: Scheduler,
    config: WorkerConfig,
    launcher: Arc<dyn JobLauncher>,
    observer: Arc<dyn WorkerObserver>,
    pid: u32,
    /// Job process pid to job id.
    children: HashMap<u32, String>,
    running: JoinSet<ChildExit>,
    /// Index of the queue polled first.
    cursor: usize,
}

impl Worker {
    pub fn new(scheduler: Scheduler, config: WorkerConfig, launcher: Arc<dyn JobLauncher>) -> Self {
        Self {
            scheduler,
            config,
            launcher,
            observer: Arc::new(TracingObserver),
            pid: current_pid(),
            children: HashMap::new(),
            running: JoinSet::new(),
            cursor: 0,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Overrides the pid the worker registers under.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn queues(&self) -> &[String] {
        &self.config.queues
    }

    /// Runs until SIGTERM or SIGINT, then drains.
    pub async fn run_until_signal(self) -> Result<(), WorkerError> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let listener = listen_for_shutdown(shutdown_tx).map_err(WorkerError::Signal)?;

        let result = self.run(shutdown_rx).await;
        listener.abort();
        result
    }

    /// Registers the worker, runs the loop until `shutdown` fires, waits for
    /// every job process and unregisters.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), WorkerError> {
        self.notify(WorkerState::Initializing, "registering");
        self.register().await?;
        info!(worker_pid = self.pid, queues = ?self.config.queues, threads = self.config.threads, "Worker started");

        self.main_loop(&mut shutdown).await;

        self.notify(WorkerState::Draining, "waiting for running jobs");
        self.drain().await;

        let result = self.unregister().await;
        self.notify(WorkerState::Terminated, "stopped");
        info!(worker_pid = self.pid, "Worker stopped");
        result
    }

    async fn main_loop(&mut self, shutdown: &mut broadcast::Receiver<()>) {
        loop {
            if shutdown_requested(shutdown) {
                break;
            }

            self.reap_ready().await;

            if self.running.len() >= self.config.threads {
                self.notify(WorkerState::Running, "all slots busy");
                tokio::select! {
                    Some(exit) = self.running.join_next() => self.reap(exit).await,
                    _ = shutdown.recv() => break,
                }
                continue;
            }

            match self.next_job().await {
                Ok(Some(job)) => self.launch(job).await,
                Ok(None) => {
                    self.notify(WorkerState::Running, "waiting for jobs");
                    tokio::select! {
                        Some(exit) = self.running.join_next(), if !self.running.is_empty() => {
                            self.reap(exit).await
                        }
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(worker_pid = self.pid, error = %e, "Failed to poll queues");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
        debug!(worker_pid = self.pid, "Worker received shutdown signal");
    }

    async fn register(&self) -> Result<(), WorkerError> {
        let queues = &self.config.queues;
        if queues.is_empty() {
            return Err(WorkerError::NoQueues);
        }

        let pools = self.scheduler.pools();
        for queue in queues {
            let owner = pools.worker(queue).get().await.map_err(SchedulerError::from)?;
            let Some(owner) = owner.and_then(|v| v.parse::<u32>().ok()) else {
                continue;
            };
            if owner != self.pid && is_alive(owner) {
                return Err(WorkerError::QueueAlreadyWatched {
                    queue: queue.clone(),
                    pid: owner,
                });
            }
        }

        let pid = self.pid.to_string();
        for queue in queues {
            pools.worker(queue).set(&pid).await.map_err(SchedulerError::from)?;
        }
        pools.pids.add(&pid).await.map_err(SchedulerError::from)?;
        Ok(())
    }

    async fn unregister(&self) -> Result<(), WorkerError> {
        let pools = self.scheduler.pools();
        let pid = self.pid.to_string();

        for queue in &self.config.queues {
            let owner = pools.worker(queue);
            if owner.get().await.map_err(SchedulerError::from)?.as_deref() == Some(pid.as_str()) {
                owner.delete().await.map_err(SchedulerError::from)?;
            }
        }
        pools.pids.remove(&pid).await.map_err(SchedulerError::from)?;
        Ok(())
    }

    /// Pops the next job, polling each queue at most once.
    async fn next_job(&mut self) -> Result<Option<Job>, SchedulerError> {
        let count = self.config.queues.len();
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            if let Some(job) = self.scheduler.pop(&self.config.queues[index]).await? {
                self.cursor = (index + 1) % count;
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn launch(&mut self, job: Job) {
        let LaunchedJob { pid, exit } = match self.launcher.launch(&job) {
            Ok(launched) => launched,
            Err(e) => {
                error!(worker_pid = self.pid, job_id = %job.id, error = %e, "Failed to start job process");
                self.restore(&job.id).await;
                return;
            }
        };

        let job_id = job.id.clone();
        self.children.insert(pid, job_id.clone());
        self.running.spawn(async move {
            let status = exit.await;
            ChildExit { pid, job_id, status }
        });

        if let Err(e) = self.scheduler.pools().children(self.pid).add(&pid.to_string()).await {
            warn!(worker_pid = self.pid, pid, error = %e, "Failed to record job process");
        }

        debug!(worker_pid = self.pid, job_id = %job.id, queue = %job.queue, pid, "Job process started");
        self.notify(
            WorkerState::Running,
            &format!("executing {} ({})", job.id, job.payload),
        );
    }

    /// Reaps every job process that has already exited.
    async fn reap_ready(&mut self) {
        while let Some(exit) = self.running.join_next().now_or_never().flatten() {
            self.reap(exit).await;
        }
    }

    async fn drain(&mut self) {
        if !self.children.is_empty() {
            let jobs: Vec<&str> = self.children.values().map(String::as_str).collect();
            info!(worker_pid = self.pid, jobs = ?jobs, "Waiting for running jobs");
        }
        while let Some(exit) = self.running.join_next().await {
            self.reap(exit).await;
        }
    }

    async fn reap(&mut self, exit: Result<ChildExit, JoinError>) {
        let ChildExit { pid, job_id, status } = match exit {
            Ok(exit) => exit,
            Err(e) => {
                error!(worker_pid = self.pid, error = %e, "Job process watcher failed");
                return;
            }
        };

        self.children.remove(&pid);
        if let Err(e) = self.scheduler.pools().children(self.pid).remove(&pid.to_string()).await {
            warn!(worker_pid = self.pid, pid, error = %e, "Failed to forget job process");
        }

        let failed = match &status {
            Ok(status) => !status.success(),
            Err(e) => {
                warn!(worker_pid = self.pid, pid, job_id = %job_id, error = %e, "Failed to wait for job process");
                true
            }
        };

        let still_executing = match self.scheduler.is_executing(&job_id).await {
            Ok(executing) => executing,
            Err(e) => {
                error!(worker_pid = self.pid, job_id = %job_id, error = %e, "Failed to read job status");
                false
            }
        };

        if failed || still_executing {
            warn!(worker_pid = self.pid, pid, job_id = %job_id, status = ?status.ok(), "Job process crashed");
            self.restore(&job_id).await;
        } else {
            debug!(worker_pid = self.pid, pid, job_id = %job_id, "Job process exited");
        }
    }

    async fn restore(&self, job_id: &str) {
        match self.scheduler.restore(job_id).await {
            Ok(true) => {}
            Ok(false) => info!(job_id = %job_id, "Job not restored"),
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to restore job"),
        }
    }

    fn notify(&self, state: WorkerState, message: &str) {
        self.observer
            .state_changed(state, &self.config.queues, message);
    }
}

/// Non-blocking shutdown check. A closed or lagged channel counts as shutdown.
fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    use broadcast::error::TryRecvError;

    match shutdown.try_recv() {
        Ok(()) | Err(TryRecvError::Closed) | Err(TryRecvError::Lagged(_)) => true,
        Err(TryRecvError::Empty) => false,
    }
}
