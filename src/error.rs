//! Error types for scheduler operations.
//!
//! Defines the error types shared across the scheduler subsystems:
//! - Job bookkeeping (enqueue, lookup, restore)
//! - Payload resolution and execution
//!
//! Store, configuration and worker errors live next to their modules.

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Cannot push job '{id}' of queue '{job_queue}' into queue '{queue}'")]
    WrongQueue {
        id: String,
        job_queue: String,
        queue: String,
    },

    #[error("Invalid interval for job '{id}': {interval} seconds")]
    InvalidInterval { id: String, interval: u64 },

    #[error("Repeatable jobs require an explicit id")]
    MissingId,
}

/// Errors that can occur while resolving or executing a payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Payload '{0}' is not registered")]
    UnknownPayload(String),

    #[error("Invalid arguments for payload '{payload}': {source}")]
    InvalidArgs {
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Payload failed: {0}")]
    Failed(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::JobNotFound("42".to_string());
        assert_eq!(err.to_string(), "Job '42' not found");

        let err = SchedulerError::WrongQueue {
            id: "7".to_string(),
            job_queue: "mail".to_string(),
            queue: "default".to_string(),
        };
        assert!(err.to_string().contains("mail"));
        assert!(err.to_string().contains("default"));

        let err = SchedulerError::InvalidInterval {
            id: "tick".to_string(),
            interval: 0,
        };
        assert!(err.to_string().contains("tick"));
    }

    #[test]
    fn test_payload_error_display() {
        let err = PayloadError::UnknownPayload("mailer".to_string());
        assert!(err.to_string().contains("mailer"));

        let err = PayloadError::Failed(anyhow::anyhow!("disk full"));
        assert!(err.to_string().contains("disk full"));
    }
}
