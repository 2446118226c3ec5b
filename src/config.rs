//! Scheduler and worker configuration.
//!
//! This module provides configuration for the two halves of the system: the
//! [`SchedulerConfig`] shared by producers, workers and health checks, and the
//! [`WorkerConfig`] of a single worker process.

use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use crate::scheduler::job::MAX_DELAY;

/// Default Redis connection URL.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default store key prefix.
pub const DEFAULT_PREFIX: &str = "jobforge";

/// Default queue name.
pub const DEFAULT_QUEUE: &str = "default";

/// Default number of concurrently running jobs per worker.
pub const DEFAULT_THREADS: usize = 5;

/// Default delays (in seconds) applied after successive job faults.
pub const DEFAULT_FAULT_INTERVALS: [u64; 5] = [30, 60, 300, 3600, 7200];

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration shared by everything that talks to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Prefix of every key written to the store. Must not end with ':'.
    pub prefix: String,
    /// Delays (in seconds) between job faults. A non-repeatable job is
    /// failed permanently once it has faulted more times than there are
    /// entries.
    pub fault_intervals: Vec<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            fault_intervals: DEFAULT_FAULT_INTERVALS.to_vec(),
        }
    }
}

impl SchedulerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `JOBFORGE_REDIS_URL`: Redis connection URL (default: redis://127.0.0.1:6379)
    /// - `JOBFORGE_PREFIX`: Store key prefix (default: jobforge)
    /// - `JOBFORGE_FAULT_INTERVALS`: Comma-separated fault delays in seconds
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("JOBFORGE_REDIS_URL") {
            config.redis_url = val;
        }

        if let Ok(val) = std::env::var("JOBFORGE_PREFIX") {
            config.prefix = val;
        }

        if let Ok(val) = std::env::var("JOBFORGE_FAULT_INTERVALS") {
            config.fault_intervals = parse_intervals(&val, "JOBFORGE_FAULT_INTERVALS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Sets the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the fault interval table.
    pub fn with_fault_intervals(mut self, intervals: Vec<u64>) -> Self {
        self.fault_intervals = intervals;
        self
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.prefix.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "prefix cannot be empty".to_string(),
            ));
        }

        if self.prefix.ends_with(':') {
            return Err(ConfigError::ValidationFailed(
                "prefix must not end with ':'".to_string(),
            ));
        }

        if let Some(interval) = self.fault_intervals.iter().find(|&&i| i > MAX_DELAY) {
            return Err(ConfigError::ValidationFailed(format!(
                "fault interval {} exceeds {} seconds",
                interval, MAX_DELAY
            )));
        }

        Ok(())
    }
}

/// Configuration of a single worker process.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Queues watched by the worker, in polling order.
    pub queues: Vec<String>,
    /// Maximum number of jobs executing at the same time.
    pub threads: usize,
    /// How long to wait for a signal or a finished job when no job is due.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: vec![DEFAULT_QUEUE.to_string()],
            threads: DEFAULT_THREADS,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl WorkerConfig {
    /// Creates a configuration watching the given queues.
    ///
    /// Queue names may contain comma-separated lists; they are split,
    /// trimmed and deduplicated, keeping the given order. An empty list falls
    /// back to the default queue.
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            queues: normalize_queues(queues),
            ..Default::default()
        }
    }

    /// Sets the maximum number of concurrent jobs.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one queue is required".to_string(),
            ));
        }

        if self.threads == 0 {
            return Err(ConfigError::ValidationFailed(
                "threads must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Splits, trims and deduplicates queue names, keeping first occurrences
/// in order.
pub fn normalize_queues<I, S>(queues: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut names: Vec<String> = queues
        .into_iter()
        .flat_map(|q| {
            q.as_ref()
                .split(',')
                .map(|s| s.trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect();

    if names.is_empty() {
        names.push(DEFAULT_QUEUE.to_string());
    }
    names
}

/// Parses a comma-separated list of seconds.
pub fn parse_intervals(value: &str, key: &str) -> Result<Vec<u64>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_env_value(s, key))
        .collect()
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();

        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.prefix, "jobforge");
        assert_eq!(config.fault_intervals, vec![30, 60, 300, 3600, 7200]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_config_builder() {
        let config = SchedulerConfig::new()
            .with_redis_url("redis://custom:6380")
            .with_prefix("app")
            .with_fault_intervals(vec![1, 2]);

        assert_eq!(config.redis_url, "redis://custom:6380");
        assert_eq!(config.prefix, "app");
        assert_eq!(config.fault_intervals, vec![1, 2]);
    }

    #[test]
    fn test_scheduler_config_rejects_trailing_colon() {
        let config = SchedulerConfig::new().with_prefix("app:");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_scheduler_config_rejects_huge_fault_interval() {
        let config = SchedulerConfig::new().with_fault_intervals(vec![30, u64::MAX]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
        assert!(SchedulerConfig::new()
            .with_fault_intervals(vec![MAX_DELAY])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();

        assert_eq!(config.queues, vec!["default"]);
        assert_eq!(config.threads, 5);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_config_zero_threads_invalid() {
        let config = WorkerConfig::default().with_threads(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_normalize_queues() {
        assert_eq!(
            normalize_queues(["mail, sms", "default", "mail"]),
            vec!["mail", "sms", "default"]
        );
        assert_eq!(
            normalize_queues(["zeta", "alpha,zeta", "beta"]),
            vec!["zeta", "alpha", "beta"]
        );
        assert_eq!(normalize_queues(Vec::<String>::new()), vec!["default"]);
        assert_eq!(normalize_queues([" , "]), vec!["default"]);
    }

    #[test]
    fn test_parse_intervals() {
        assert_eq!(parse_intervals("1, 2,3", "K").unwrap(), vec![1, 2, 3]);
        assert!(parse_intervals("", "K").unwrap().is_empty());

        let err = parse_intervals("1,x", "K").unwrap_err();
        assert!(err.to_string().contains("K"));
    }
}
