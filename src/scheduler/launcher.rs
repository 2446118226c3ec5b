//! Starting job processes.
//!
//! The worker never runs a payload in its own process. [`ProcessLauncher`]
//! re-executes the current binary with the hidden `run-job` command, which
//! connects to the store on its own and runs exactly one job.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::process::Command;

use crate::config::SchedulerConfig;

use super::job::Job;

/// A started job process.
pub struct LaunchedJob {
    /// Pid of the job process.
    pub pid: u32,
    /// Resolves once the process has exited and been reaped.
    pub exit: BoxFuture<'static, io::Result<ExitStatus>>,
}

/// Starts the process that runs one job.
pub trait JobLauncher: Send + Sync {
    fn launch(&self, job: &Job) -> io::Result<LaunchedJob>;
}

/// Launches `<program> run-job --id <id>` subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    redis_url: String,
    prefix: String,
    log_level: Option<String>,
}

impl ProcessLauncher {
    /// Creates a launcher running `program`.
    pub fn new(program: impl Into<PathBuf>, config: &SchedulerConfig) -> Self {
        Self {
            program: program.into(),
            redis_url: config.redis_url.clone(),
            prefix: config.prefix.clone(),
            log_level: None,
        }
    }

    /// Creates a launcher re-executing the current binary.
    pub fn current_exe(config: &SchedulerConfig) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, config))
    }

    /// Passes `--log-level` to job processes.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    fn command(&self, job: &Job) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(level) = &self.log_level {
            command.arg("--log-level").arg(level);
        }
        command
            .arg("--redis-url")
            .arg(&self.redis_url)
            .arg("--prefix")
            .arg(&self.prefix)
            .arg("run-job")
            .arg("--id")
            .arg(&job.id)
            .stdin(Stdio::null());
        command
    }
}

impl JobLauncher for ProcessLauncher {
    fn launch(&self, job: &Job) -> io::Result<LaunchedJob> {
        let mut child = self.command(job).spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "job process exited before reporting its pid"))?;

        Ok(LaunchedJob {
            pid,
            exit: async move { child.wait().await }.boxed(),
        })
    }
}
