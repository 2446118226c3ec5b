//! Job records.
//!
//! A job is persisted as a single JSON document under `<prefix>:job:<id>`.
//! The record says which payload to run with which arguments, which queue
//! the job belongs to and which discipline ([`JobType`]) schedules it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arguments handed to a payload, keyed by field name.
pub type JobArgs = Map<String, Value>;

/// Queueing discipline of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Runs as soon as a worker pops it.
    Simple,
    /// Runs once, at or after its due timestamp.
    Scheduled,
    /// Runs every `interval` seconds until deleted.
    Repeatable,
}

impl JobType {
    /// Returns the name used in store keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Simple => "simple",
            JobType::Scheduled => "scheduled",
            JobType::Repeatable => "repeatable",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted job metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique, immutable identifier.
    pub id: String,
    /// Logical queue name.
    pub queue: String,
    /// Queueing discipline.
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Name of the registered payload to execute.
    #[serde(rename = "class")]
    pub payload: String,
    /// Arguments bound to the payload before it runs.
    #[serde(default)]
    pub args: JobArgs,
    /// Unix timestamp of the first save.
    #[serde(default)]
    pub created: i64,
    /// Due time of a scheduled job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Period of a repeatable job, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Consecutive failure count.
    #[serde(default)]
    pub faults: u32,
    /// Unix timestamp of the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed: Option<i64>,
}

impl Job {
    /// Creates a simple job record. `created` is filled in on save.
    pub fn new(
        id: impl Into<String>,
        queue: impl Into<String>,
        payload: impl Into<String>,
        args: JobArgs,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            job_type: JobType::Simple,
            payload: payload.into(),
            args,
            created: 0,
            timestamp: None,
            interval: None,
            faults: 0,
            last_failed: None,
        }
    }

    /// Turns the record into a scheduled job due at `timestamp`.
    pub fn scheduled_at(mut self, timestamp: i64) -> Self {
        self.job_type = JobType::Scheduled;
        self.timestamp = Some(timestamp);
        self
    }

    /// Turns the record into a repeatable job running every `interval` seconds.
    pub fn repeating_every(mut self, interval: u64) -> Self {
        self.job_type = JobType::Repeatable;
        self.interval = Some(interval);
        self
    }

    /// Returns whether the job is rescheduled instead of deleted on success.
    pub fn is_repeatable(&self) -> bool {
        self.job_type == JobType::Repeatable
    }

    /// Records a failure at `now`.
    pub fn record_fault(&mut self, now: i64) {
        self.faults += 1;
        self.last_failed = Some(now);
    }

    /// Serializes the record for storage.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a stored record.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

/// Longest delay, in seconds, a job can be scheduled ahead (about 100 years).
///
/// Due timestamps stay well inside the range sorted-set scores hold exactly.
pub const MAX_DELAY: u64 = 100 * 365 * 24 * 60 * 60;

/// Current unix timestamp in seconds.
pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Returns `from + seconds`, or `None` when `seconds` exceeds [`MAX_DELAY`]
/// or the sum overflows.
pub fn due_after(from: i64, seconds: u64) -> Option<i64> {
    if seconds > MAX_DELAY {
        return None;
    }
    i64::try_from(seconds).ok().and_then(|s| from.checked_add(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> JobArgs {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_due_after_bounds() {
        assert_eq!(due_after(1_000, 60), Some(1_060));
        assert_eq!(due_after(1_000, MAX_DELAY), Some(1_000 + MAX_DELAY as i64));
        assert_eq!(due_after(1_000, MAX_DELAY + 1), None);
        assert_eq!(due_after(1_000, u64::MAX), None);
        assert_eq!(due_after(i64::MAX, 1), None);
    }

    #[test]
    fn test_job_new_is_simple() {
        let job = Job::new("1", "default", "append", JobArgs::new());

        assert_eq!(job.job_type, JobType::Simple);
        assert_eq!(job.faults, 0);
        assert!(job.timestamp.is_none());
        assert!(job.interval.is_none());
        assert!(!job.is_repeatable());
    }

    #[test]
    fn test_job_type_conversions() {
        let job = Job::new("1", "q", "p", JobArgs::new()).scheduled_at(100);
        assert_eq!(job.job_type, JobType::Scheduled);
        assert_eq!(job.timestamp, Some(100));

        let job = Job::new("tick", "q", "p", JobArgs::new()).repeating_every(60);
        assert_eq!(job.job_type, JobType::Repeatable);
        assert_eq!(job.interval, Some(60));
        assert!(job.is_repeatable());
    }

    #[test]
    fn test_job_record_field_names() {
        let mut job = Job::new("7", "mail", "send", args(json!({"to": "a@b.c"})));
        job.record_fault(1_700_000_000);

        let value: Value = serde_json::from_str(&job.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "simple");
        assert_eq!(value["class"], "send");
        assert_eq!(value["args"]["to"], "a@b.c");
        assert_eq!(value["faults"], 1);
        assert_eq!(value["lastFailed"], 1_700_000_000);
        assert!(value.get("timestamp").is_none());
        assert!(value.get("interval").is_none());
    }

    #[test]
    fn test_job_from_minimal_record() {
        let job = Job::from_json(r#"{"id":"3","queue":"default","type":"repeatable","class":"tick"}"#)
            .unwrap();

        assert_eq!(job.id, "3");
        assert_eq!(job.job_type, JobType::Repeatable);
        assert!(job.args.is_empty());
        assert_eq!(job.faults, 0);
        assert!(job.interval.is_none());
    }

    #[test]
    fn test_job_type_display() {
        assert_eq!(JobType::Simple.to_string(), "simple");
        assert_eq!(JobType::Scheduled.to_string(), "scheduled");
        assert_eq!(JobType::Repeatable.to_string(), "repeatable");
    }
}
