//! Job scheduling and execution.
//!
//! This module provides the scheduling engine:
//!
//! - **Scheduler**: enqueue, lookup, lifecycle bookkeeping and retry with backoff
//! - **Queue**: per-queue pools with scheduled > repeatable > simple priority
//! - **Worker**: per-process loop running each job in its own process
//! - **Health**: reconciliation of pid pools and executing jobs with live processes
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────┐  enqueue   ┌──────────────────────────────┐
//!    │ Producer ├───────────▶│ Redis                        │
//!    └──────────┘            │  job:<id>                    │
//!                            │  queue:<q>:simple|scheduled| │
//!                            │            repeatable        │
//!                            │  executing / completed /     │
//!                            │  failed / pids / children    │
//!                            └───────▲──────────────▲───────┘
//!                                pop │              │ mark started/completed
//!                            ┌───────┴──────┐  spawn ┌┴────────────┐
//!                            │    Worker    ├───────▶│ run-job <id> │
//!                            └───────┬──────┘  reap  └─────────────┘
//!                                    │ restore on crash
//!                                    ▼
//!                               Scheduler::restore
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use jobforge::config::{SchedulerConfig, WorkerConfig};
//! use jobforge::scheduler::{ProcessLauncher, Scheduler, Worker};
//! use std::sync::Arc;
//!
//! let config = SchedulerConfig::from_env()?;
//! let scheduler = Scheduler::connect(&config).await?;
//!
//! scheduler
//!     .job("append")
//!     .with_args(args)
//!     .with_id("tick")
//!     .run_each(60)
//!     .enqueue()
//!     .await?;
//!
//! let launcher = Arc::new(ProcessLauncher::current_exe(&config)?);
//! Worker::new(scheduler, WorkerConfig::new(["default"]), launcher)
//!     .run_until_signal()
//!     .await?;
//! ```

pub mod builtin;
pub mod core;
pub mod health;
pub mod job;
pub mod launcher;
pub mod payload;
pub mod pool;
pub mod process;
pub mod producer;
pub mod queue;
pub mod runner;
pub mod worker;

// Re-export main types for convenience
pub use builtin::builtin_registry;
pub use self::core::Scheduler;
pub use health::{Health, HealthReport};
pub use job::{Job, JobArgs, JobType};
pub use launcher::{JobLauncher, LaunchedJob, ProcessLauncher};
pub use payload::{JobContext, Payload, PayloadFactory, PayloadRegistry};
pub use pool::{JobPool, KeySpace, Pools, SetPool, SortedSetPool, StringKey};
pub use process::{current_pid, is_alive, listen_for_shutdown, terminate};
pub use producer::JobProducer;
pub use queue::Queue;
pub use runner::{JobRunner, RunError};
pub use worker::{TracingObserver, Worker, WorkerError, WorkerObserver, WorkerState};
