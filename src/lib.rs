//! jobforge: background job scheduler and worker manager backed by Redis.
//!
//! Producers enqueue simple, scheduled or repeatable jobs; worker processes
//! pop them from their queues and run each one in its own process, with a
//! per-worker concurrency limit, crash detection and retry with backoff.

pub mod cli;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use config::{ConfigError, SchedulerConfig, WorkerConfig};
pub use error::{PayloadError, SchedulerError};
pub use scheduler::{Job, JobType, Scheduler, Worker, WorkerError};
pub use store::{MemoryStore, RedisStore, Store, StoreError};
