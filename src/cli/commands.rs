//! CLI command definitions for jobforge.
//!
//! Provides the process control commands (`start`, `stop`, `status`,
//! `check`, `worker`), the producer and inspection commands (`enqueue`,
//! `inspect`, `result`) and the hidden `run-job` command the worker uses to
//! run each job in its own process.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, ExitCode, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::config::{
    SchedulerConfig, WorkerConfig, DEFAULT_PREFIX, DEFAULT_QUEUE, DEFAULT_REDIS_URL,
    DEFAULT_THREADS,
};
use crate::scheduler::{
    current_pid, is_alive, terminate, Health, Job, JobArgs, JobRunner, PayloadRegistry,
    ProcessLauncher, Scheduler, Worker, WorkerError,
};

/// Interval between liveness probes while stopping workers.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `start` watches a new worker for an early exit.
const START_GRACE: Duration = Duration::from_millis(500);

/// Background job scheduler backed by Redis.
#[derive(Parser)]
#[command(name = "jobforge")]
#[command(about = "Background job scheduler and worker manager backed by Redis")]
#[command(version)]
#[command(
    long_about = "jobforge runs simple, scheduled and repeatable jobs in worker processes.\n\nEach job runs in its own process; crashed jobs are retried with backoff.\n\nExample usage:\n  jobforge start --queue default,mail --threads 5 --log worker.log\n  jobforge enqueue append --args '{\"path\":\"/tmp/out\",\"text\":\"x\"}' --every 60 --id tick\n  jobforge stop"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis connection URL.
    #[arg(long, env = "JOBFORGE_REDIS_URL", default_value = DEFAULT_REDIS_URL, global = true)]
    pub redis_url: String,

    /// Prefix of every key jobforge writes.
    #[arg(long, env = "JOBFORGE_PREFIX", default_value = DEFAULT_PREFIX, global = true)]
    pub prefix: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Start a detached worker process.
    Start(StartArgs),

    /// Stop every registered worker and wait for it to exit.
    Stop,

    /// Report whether the registered workers are alive.
    Status,

    /// Remove dead processes and restore jobs they left behind.
    Check(CheckArgs),

    /// Run a worker in the foreground.
    Worker(WorkerArgs),

    /// Enqueue a job.
    Enqueue(EnqueueArgs),

    /// Show a job record and its status.
    Inspect(InspectArgs),

    /// Print the stored result of a job.
    Result(ResultArgs),

    /// Run a single job in this process.
    #[command(hide = true)]
    RunJob(RunJobArgs),
}

/// Queue and concurrency options shared by `start` and `worker`.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Queues to watch. Repeat the flag or separate names with commas.
    #[arg(short, long = "queue", default_value = DEFAULT_QUEUE)]
    pub queues: Vec<String>,

    /// Maximum number of jobs running at once.
    #[arg(short, long, env = "JOBFORGE_THREADS", default_value_t = DEFAULT_THREADS)]
    pub threads: usize,

    /// Wait between polls of empty queues, in milliseconds.
    #[arg(long, env = "JOBFORGE_POLL_INTERVAL_MS", default_value = "100")]
    pub poll_interval_ms: u64,
}

impl WorkerArgs {
    fn config(&self) -> anyhow::Result<WorkerConfig> {
        let config = WorkerConfig::new(&self.queues)
            .with_threads(self.threads)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms));
        config.validate()?;
        Ok(config)
    }
}

/// Arguments for `jobforge start`.
#[derive(Args, Debug)]
pub struct StartArgs {
    #[command(flatten)]
    pub worker: WorkerArgs,

    /// File receiving the worker's output. Output is discarded when omitted.
    #[arg(long)]
    pub log: Option<PathBuf>,
}

/// Arguments for `jobforge check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Also delete job records missing from their pool.
    #[arg(long)]
    pub lost: bool,

    /// Seconds a lost job must stay lost before it is deleted.
    #[arg(long, default_value = "5")]
    pub grace_secs: u64,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `jobforge enqueue`.
#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Name of the payload to run.
    pub payload: String,

    /// Payload arguments as a JSON object.
    #[arg(short, long, default_value = "{}")]
    pub args: String,

    /// Queue to put the job into.
    #[arg(short, long, default_value = DEFAULT_QUEUE)]
    pub queue: String,

    /// Job id. Generated when omitted; required with --every.
    #[arg(long)]
    pub id: Option<String>,

    /// Run once at this unix timestamp.
    #[arg(long, conflicts_with_all = ["after", "every"])]
    pub at: Option<i64>,

    /// Run once after this many seconds.
    #[arg(long, conflicts_with = "every")]
    pub after: Option<u64>,

    /// Run every this many seconds.
    #[arg(long, requires = "id")]
    pub every: Option<u64>,
}

/// Arguments for `jobforge inspect`.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Job id.
    pub id: String,
}

/// Arguments for `jobforge result`.
#[derive(Args, Debug)]
pub struct ResultArgs {
    /// Job id.
    pub id: String,

    /// Delete the result after printing it.
    #[arg(long)]
    pub clear: bool,
}

/// Arguments for `jobforge run-job`.
#[derive(Args, Debug)]
pub struct RunJobArgs {
    /// Id of the job to run.
    #[arg(long)]
    pub id: String,
}

/// Job record together with its status, as printed by `inspect`.
#[derive(Debug, Serialize)]
struct JobInspection {
    id: String,
    job: Option<Job>,
    executing: bool,
    completed: bool,
    failed: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run(registry: PayloadRegistry) -> anyhow::Result<ExitCode> {
    run_with_cli(parse_cli(), registry).await
}

/// Run the CLI with the parsed arguments.
///
/// `registry` holds the payloads `run-job` can execute; binaries embedding
/// their own payloads pass their own registry.
pub async fn run_with_cli(cli: Cli, registry: PayloadRegistry) -> anyhow::Result<ExitCode> {
    let config = SchedulerConfig::from_env()?
        .with_redis_url(cli.redis_url.clone())
        .with_prefix(cli.prefix.clone());
    config.validate()?;

    match cli.command {
        Commands::Start(args) => run_start_command(&cli.log_level, &config, args).await,
        Commands::Stop => run_stop_command(&config).await,
        Commands::Status => run_status_command(&config).await,
        Commands::Check(args) => run_check_command(&config, args).await,
        Commands::Worker(args) => run_worker_command(&cli.log_level, &config, args).await,
        Commands::Enqueue(args) => run_enqueue_command(&config, args).await,
        Commands::Inspect(args) => run_inspect_command(&config, args).await,
        Commands::Result(args) => run_result_command(&config, args).await,
        Commands::RunJob(args) => run_job_command(&config, &registry, args).await,
    }
}

// ============================================================================
// Process control
// ============================================================================

async fn run_start_command(
    log_level: &str,
    config: &SchedulerConfig,
    args: StartArgs,
) -> anyhow::Result<ExitCode> {
    let worker_config = args.worker.config()?;
    let queues = worker_config.queues.join(", ");

    let (stdout, stderr) = match &args.log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            (Stdio::from(file.try_clone()?), Stdio::from(file))
        }
        None => (Stdio::null(), Stdio::null()),
    };

    let exe = std::env::current_exe().context("Failed to locate the jobforge binary")?;
    let mut command = Command::new(exe);
    command
        .arg("--log-level")
        .arg(log_level)
        .arg("--redis-url")
        .arg(&config.redis_url)
        .arg("--prefix")
        .arg(&config.prefix)
        .arg("worker")
        .arg("--threads")
        .arg(worker_config.threads.to_string())
        .arg("--poll-interval-ms")
        .arg(worker_config.poll_interval.as_millis().to_string());
    for queue in &worker_config.queues {
        command.arg("--queue").arg(queue);
    }
    command
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0);

    print!("Starting worker for {} ({} threads)... ", queues, worker_config.threads);
    let mut child = command.spawn().context("Failed to spawn worker")?;

    tokio::time::sleep(START_GRACE).await;
    if let Some(status) = child.try_wait()? {
        if !status.success() {
            println!("failed ({}).", status);
            return Ok(ExitCode::FAILURE);
        }
    }

    println!("Done (pid {}).", child.id());
    Ok(ExitCode::SUCCESS)
}

async fn run_stop_command(config: &SchedulerConfig) -> anyhow::Result<ExitCode> {
    let scheduler = Scheduler::connect(config).await?;
    Health::new(&scheduler).check().await?;

    let pids = scheduler.pools().pids.members().await?;
    if pids.is_empty() {
        println!("No pids found.");
        return Ok(ExitCode::SUCCESS);
    }

    for pid in pids {
        let Ok(pid) = pid.parse::<u32>() else {
            continue;
        };
        print!("Killing {}... ", pid);
        if let Err(e) = terminate(pid) {
            println!("failed: {}", e);
            continue;
        }
        while is_alive(pid) {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        println!("Done.");
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_status_command(config: &SchedulerConfig) -> anyhow::Result<ExitCode> {
    let scheduler = Scheduler::connect(config).await?;
    let pids = scheduler.pools().pids.members().await?;

    if pids.is_empty() {
        println!("No processes found. System is not working.");
        return Ok(ExitCode::FAILURE);
    }

    let (alive, dead): (Vec<String>, Vec<String>) = pids
        .into_iter()
        .partition(|pid| pid.parse::<u32>().map(is_alive).unwrap_or(false));

    if dead.is_empty() {
        println!(
            "All processes ({}) are alive. Everything looks good.",
            alive.join(", ")
        );
        return Ok(ExitCode::SUCCESS);
    }

    if alive.is_empty() {
        println!(
            "All processes ({}) are dead. System is not working.",
            dead.join(", ")
        );
    } else {
        println!(
            "Some dead processes ({}) found! Run 'jobforge check' to remove them.",
            dead.join(", ")
        );
    }
    Ok(ExitCode::FAILURE)
}

async fn run_check_command(config: &SchedulerConfig, args: CheckArgs) -> anyhow::Result<ExitCode> {
    let scheduler = Scheduler::connect(config).await?;
    let health = Health::new(&scheduler);

    let report = health.check().await?;
    let lost = if args.lost {
        Some(health.check_lost_jobs(Duration::from_secs(args.grace_secs)).await?)
    } else {
        None
    };

    if args.json {
        let output = serde_json::json!({
            "healthy": report.is_healthy(),
            "report": report,
            "lost_jobs": lost,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Dead children: {}", report.dead_children);
    println!("Dead workers: {}", report.dead_workers);
    println!(
        "Stopped jobs: {} found, {} restored",
        report.stopped_jobs, report.restored_jobs
    );
    if let Some(lost) = lost {
        println!("Lost jobs deleted: {}", lost.len());
    }
    println!(
        "{}",
        if report.is_healthy() {
            "Everything was consistent."
        } else {
            "Problems were found and repaired."
        }
    );
    Ok(ExitCode::SUCCESS)
}

async fn run_worker_command(
    log_level: &str,
    config: &SchedulerConfig,
    args: WorkerArgs,
) -> anyhow::Result<ExitCode> {
    let worker_config = args.config()?;
    let scheduler = Scheduler::connect(config).await?;
    let launcher = ProcessLauncher::current_exe(config)?.with_log_level(log_level);

    let worker = Worker::new(scheduler, worker_config, Arc::new(launcher));
    match worker.run_until_signal().await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e @ WorkerError::QueueAlreadyWatched { .. }) => {
            error!(error = %e, "Refusing to start worker");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Jobs
// ============================================================================

async fn run_enqueue_command(config: &SchedulerConfig, args: EnqueueArgs) -> anyhow::Result<ExitCode> {
    let job_args = parse_job_args(&args.args)?;
    let scheduler = Scheduler::connect(config).await?;

    let mut producer = scheduler
        .job(args.payload.as_str())
        .into_queue(args.queue.as_str())
        .with_args(job_args);
    if let Some(id) = &args.id {
        producer = producer.with_id(id.as_str());
    }
    if let Some(timestamp) = args.at {
        producer = producer.run_at(timestamp);
    }
    if let Some(seconds) = args.after {
        producer = producer.run_after(seconds);
    }
    if let Some(interval) = args.every {
        producer = producer.run_each(interval);
    }

    match producer.enqueue().await? {
        Some(job) => {
            info!(job_id = %job.id, "Job enqueued");
            println!("{}", job.id);
        }
        None => {
            println!(
                "Job {} already exists, nothing enqueued.",
                args.id.as_deref().unwrap_or_default()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_inspect_command(config: &SchedulerConfig, args: InspectArgs) -> anyhow::Result<ExitCode> {
    let scheduler = Scheduler::connect(config).await?;

    let inspection = JobInspection {
        job: scheduler.find(&args.id).await?,
        executing: scheduler.is_executing(&args.id).await?,
        completed: scheduler.is_completed(&args.id).await?,
        failed: scheduler.is_failed(&args.id).await?,
        id: args.id,
    };

    println!("{}", serde_json::to_string_pretty(&inspection)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_result_command(config: &SchedulerConfig, args: ResultArgs) -> anyhow::Result<ExitCode> {
    let scheduler = Scheduler::connect(config).await?;

    match scheduler.get_result(&args.id, args.clear).await? {
        Some(result) => {
            println!("{}", serde_json::to_string(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::FAILURE),
    }
}

async fn run_job_command(
    config: &SchedulerConfig,
    registry: &PayloadRegistry,
    args: RunJobArgs,
) -> anyhow::Result<ExitCode> {
    let scheduler = Scheduler::connect(config).await?;

    match JobRunner::new(&scheduler, registry).run(&args.id, current_pid()).await {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!(job_id = %args.id, error = %e, "Job failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn parse_job_args(raw: &str) -> anyhow::Result<JobArgs> {
    match serde_json::from_str::<Value>(raw).context("--args must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--args must be a JSON object, got {}", other),
    }
}
