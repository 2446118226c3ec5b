//! End-to-end tests running the jobforge binary against a real Redis.
//!
//! Run with: JOBFORGE_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test --test worker_integration -- --ignored

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use jobforge::config::SchedulerConfig;
use jobforge::scheduler::{terminate, Health, JobArgs, JobType, Scheduler};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::process::{Child, Command};

fn redis_url() -> String {
    std::env::var("JOBFORGE_TEST_REDIS_URL")
        .expect("JOBFORGE_TEST_REDIS_URL environment variable must be set for integration tests")
}

fn config(name: &str) -> SchedulerConfig {
    SchedulerConfig::default()
        .with_redis_url(redis_url())
        .with_prefix(format!("jobforge-test-{}-{}", name, std::process::id()))
        .with_fault_intervals(vec![30, 60])
}

/// Connects and removes everything left under the test prefix.
async fn connect(config: &SchedulerConfig) -> Scheduler {
    let scheduler = Scheduler::connect(config).await.expect("Redis should be reachable");
    let pattern = format!("{}:*", config.prefix);
    for key in scheduler.store().keys(&pattern).await.unwrap() {
        scheduler.store().del(&key).await.unwrap();
    }
    scheduler
}

fn args(value: Value) -> JobArgs {
    value.as_object().cloned().unwrap_or_default()
}

struct WorkerProcess {
    child: Child,
}

impl WorkerProcess {
    fn start(config: &SchedulerConfig, queue: &str, threads: usize) -> Self {
        let child = Command::new(env!("CARGO_BIN_EXE_jobforge"))
            .arg("--redis-url")
            .arg(&config.redis_url)
            .arg("--prefix")
            .arg(&config.prefix)
            .arg("worker")
            .arg("--queue")
            .arg(queue)
            .arg("--threads")
            .arg(threads.to_string())
            .stdin(Stdio::null())
            .spawn()
            .expect("worker should start");
        Self { child }
    }

    async fn stop(mut self) {
        let pid = self.child.id().expect("worker should still be running");
        terminate(pid).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(30), self.child.wait())
            .await
            .expect("worker should stop")
            .unwrap();
        assert!(status.success(), "worker exited with {}", status);
    }
}

async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn file_len(path: &Path) -> usize {
    std::fs::read_to_string(path).map(|s| s.len()).unwrap_or(0)
}

#[tokio::test]
#[ignore] // Run with: cargo test --test worker_integration -- --ignored
async fn test_simple_job_completes() {
    let config = config("simple");
    let scheduler = connect(&config).await;
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("marker");

    let job = scheduler
        .enqueue("append", args(json!({"path": marker, "text": "done"})), "default", None)
        .await
        .unwrap()
        .expect("job should be created");

    let worker = WorkerProcess::start(&config, "default", 1);

    let completed = wait_for(Duration::from_secs(10), || {
        let scheduler = scheduler.clone();
        let id = job.id.clone();
        async move { scheduler.is_completed(&id).await.unwrap() }
    })
    .await;
    worker.stop().await;

    assert!(completed, "job should complete");
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "done");
    assert!(!scheduler.is_failed(&job.id).await.unwrap());
    assert!(!scheduler.is_executing(&job.id).await.unwrap());
    assert!(scheduler.pools().pids.members().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_scheduled_job_runs_when_due() {
    let config = config("scheduled");
    let scheduler = connect(&config).await;
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("marker");

    let worker = WorkerProcess::start(&config, "default", 1);
    let enqueued_at = Instant::now();
    scheduler
        .enqueue_after(2, "append", args(json!({"path": marker, "text": "x"})), "default", Some("later"))
        .await
        .unwrap()
        .expect("job should be created");

    assert!(scheduler.exists("later").await.unwrap());
    assert!(!scheduler.is_executing("later").await.unwrap());
    assert!(!scheduler.is_completed("later").await.unwrap());

    let completed = wait_for(Duration::from_secs(10), || {
        let scheduler = scheduler.clone();
        async move { scheduler.is_completed("later").await.unwrap() }
    })
    .await;
    worker.stop().await;

    assert!(completed, "job should complete");
    assert!(enqueued_at.elapsed() >= Duration::from_secs(1));
    assert!(!scheduler.exists("later").await.unwrap());
    assert_eq!(file_len(&marker), 1);
}

#[tokio::test]
#[ignore]
async fn test_repeatable_job_keeps_running() {
    let config = config("repeatable");
    let scheduler = connect(&config).await;
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("marker");

    let worker = WorkerProcess::start(&config, "default", 1);
    scheduler
        .enqueue_each(1, "append", args(json!({"path": marker, "text": "x"})), "default", "tick")
        .await
        .unwrap()
        .expect("job should be created");

    tokio::time::sleep(Duration::from_secs(5)).await;
    let runs = file_len(&marker);
    worker.stop().await;

    assert!((4..=6).contains(&runs), "expected 4 to 6 runs, got {}", runs);
    assert!(scheduler.exists("tick").await.unwrap());
    assert_eq!(scheduler.get("tick").await.unwrap().faults, 0);
}

#[tokio::test]
#[ignore]
async fn test_result_is_stored() {
    let config = config("result");
    let scheduler = connect(&config).await;

    scheduler
        .enqueue("return", args(json!({"value": {"answer": 42}})), "default", Some("r"))
        .await
        .unwrap();
    let worker = WorkerProcess::start(&config, "default", 1);

    let completed = wait_for(Duration::from_secs(10), || {
        let scheduler = scheduler.clone();
        async move { scheduler.is_completed("r").await.unwrap() }
    })
    .await;
    worker.stop().await;

    assert!(completed);
    assert_eq!(
        scheduler.get_result("r", true).await.unwrap(),
        Some(json!({"answer": 42}))
    );
    assert_eq!(scheduler.get_result("r", true).await.unwrap(), None);
}

#[tokio::test]
#[ignore]
async fn test_killed_job_process_is_restored_by_worker() {
    let config = config("killed");
    let scheduler = connect(&config).await;

    scheduler
        .enqueue("sleep", args(json!({"seconds": 30})), "default", Some("victim"))
        .await
        .unwrap();
    let worker = WorkerProcess::start(&config, "default", 1);

    let started = wait_for(Duration::from_secs(10), || {
        let scheduler = scheduler.clone();
        async move { scheduler.is_executing("victim").await.unwrap() }
    })
    .await;
    assert!(started, "job should start");

    let entries = scheduler.pools().executing.entries().await.unwrap();
    let (_, pid) = entries.iter().find(|(id, _)| id == "victim").unwrap();
    jobforge::scheduler::process::send_signal(*pid as u32, libc::SIGKILL).unwrap();

    let restored = wait_for(Duration::from_secs(10), || {
        let scheduler = scheduler.clone();
        async move {
            scheduler
                .find("victim")
                .await
                .unwrap()
                .map(|job| job.faults == 1)
                .unwrap_or(false)
        }
    })
    .await;
    worker.stop().await;

    assert!(restored, "job should be restored");
    let job = scheduler.get("victim").await.unwrap();
    assert_eq!(job.job_type, JobType::Scheduled);
    assert!(!scheduler.is_executing("victim").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_crashing_job_process_keeps_executing_marker() {
    let config = config("crash-run");
    let scheduler = connect(&config).await;

    scheduler
        .enqueue("crash", args(json!({"code": 71})), "default", Some("boom"))
        .await
        .unwrap();
    scheduler.pop("default").await.unwrap().unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_jobforge"))
        .arg("--redis-url")
        .arg(&config.redis_url)
        .arg("--prefix")
        .arg(&config.prefix)
        .arg("run-job")
        .arg("--id")
        .arg("boom")
        .status()
        .await
        .unwrap();

    assert_eq!(status.code(), Some(71));
    assert!(scheduler.is_executing("boom").await.unwrap());
    assert!(!scheduler.is_completed("boom").await.unwrap());
    assert!(scheduler.exists("boom").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_crashing_job_is_restored_by_worker() {
    let config = config("crash");
    let scheduler = connect(&config).await;

    scheduler
        .enqueue("crash", JobArgs::new(), "default", Some("boom"))
        .await
        .unwrap();
    let worker = WorkerProcess::start(&config, "default", 1);

    let restored = wait_for(Duration::from_secs(10), || {
        let scheduler = scheduler.clone();
        async move {
            scheduler
                .find("boom")
                .await
                .unwrap()
                .map(|job| job.faults == 1)
                .unwrap_or(false)
        }
    })
    .await;
    worker.stop().await;

    assert!(restored, "crashed job should be restored");
    let job = scheduler.get("boom").await.unwrap();
    assert_eq!(job.job_type, JobType::Scheduled);
    assert_eq!(job.timestamp, job.last_failed.map(|t| t + 30));
    assert!(!scheduler.is_executing("boom").await.unwrap());
    assert!(!scheduler.is_completed("boom").await.unwrap());
    assert!(!scheduler.is_failed("boom").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_health_check_restores_orphaned_job() {
    let config = config("orphan");
    let scheduler = connect(&config).await;

    scheduler
        .enqueue("sleep", JobArgs::new(), "default", Some("orphan"))
        .await
        .unwrap();
    scheduler.pop("default").await.unwrap().unwrap();

    let mut holder = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    scheduler.mark_as_started("orphan", holder.id()).await.unwrap();
    assert!(Health::new(&scheduler).check().await.unwrap().is_healthy());

    holder.kill().unwrap();
    holder.wait().unwrap();

    let report = Health::new(&scheduler).check().await.unwrap();
    assert_eq!(report.stopped_jobs, 1);
    assert_eq!(report.restored_jobs, 1);
    assert_eq!(scheduler.get("orphan").await.unwrap().faults, 1);

    // Exhaust the two-entry fault table.
    for _ in 0..2 {
        let mut holder = std::process::Command::new("true").spawn().unwrap();
        scheduler.mark_as_started("orphan", holder.id()).await.unwrap();
        holder.wait().unwrap();
        Health::new(&scheduler).check().await.unwrap();
    }

    assert!(scheduler.is_failed("orphan").await.unwrap());
    assert!(!scheduler.exists("orphan").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_second_worker_on_same_queue_is_refused() {
    let config = config("duplicate");
    let _scheduler = connect(&config).await;

    let worker = WorkerProcess::start(&config, "default", 1);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = Command::new(env!("CARGO_BIN_EXE_jobforge"))
        .arg("--redis-url")
        .arg(&config.redis_url)
        .arg("--prefix")
        .arg(&config.prefix)
        .arg("worker")
        .status()
        .await
        .unwrap();
    worker.stop().await;

    assert_eq!(status.code(), Some(1));
}
