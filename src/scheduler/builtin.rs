//! Payloads shipped with the `jobforge` binary.
//!
//! | name | args | effect |
//! |---|---|---|
//! | `append` | `path`, `text` | appends `text` to the file at `path` |
//! | `return` | `value` | returns `value` as the job result |
//! | `sleep` | `seconds` | sleeps, then returns nothing |
//! | `fail` | `message` | fails with `message` |
//! | `crash` | `code` | exits the job process immediately |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use super::payload::{JobContext, Payload, PayloadRegistry};

/// Appends text to a file.
#[derive(Debug, Deserialize)]
pub struct AppendPayload {
    pub path: PathBuf,
    #[serde(default)]
    pub text: String,
}

#[async_trait]
impl Payload for AppendPayload {
    async fn run(&mut self, _ctx: &JobContext) -> anyhow::Result<Option<Value>> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(self.text.as_bytes()).await?;
        file.flush().await?;
        Ok(None)
    }
}

/// Returns its argument as the job result.
#[derive(Debug, Deserialize)]
pub struct ReturnPayload {
    #[serde(default)]
    pub value: Value,
}

#[async_trait]
impl Payload for ReturnPayload {
    async fn run(&mut self, _ctx: &JobContext) -> anyhow::Result<Option<Value>> {
        Ok(Some(self.value.take()))
    }
}

/// Sleeps for a number of seconds.
#[derive(Debug, Deserialize)]
pub struct SleepPayload {
    #[serde(default)]
    pub seconds: f64,
}

#[async_trait]
impl Payload for SleepPayload {
    async fn run(&mut self, _ctx: &JobContext) -> anyhow::Result<Option<Value>> {
        if self.seconds > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(self.seconds)).await;
        }
        Ok(None)
    }
}

/// Always fails.
#[derive(Debug, Deserialize)]
pub struct FailPayload {
    #[serde(default = "default_fail_message")]
    pub message: String,
}

fn default_fail_message() -> String {
    "job failed".to_string()
}

#[async_trait]
impl Payload for FailPayload {
    async fn run(&mut self, _ctx: &JobContext) -> anyhow::Result<Option<Value>> {
        anyhow::bail!("{}", self.message)
    }
}

/// Terminates the job process without any bookkeeping.
#[derive(Debug, Deserialize)]
pub struct CrashPayload {
    #[serde(default = "default_crash_code")]
    pub code: i32,
}

fn default_crash_code() -> i32 {
    70
}

#[async_trait]
impl Payload for CrashPayload {
    async fn run(&mut self, ctx: &JobContext) -> anyhow::Result<Option<Value>> {
        tracing::warn!(job_id = %ctx.id, code = self.code, "Crashing job process");
        std::process::exit(self.code)
    }
}

/// Returns a registry holding every built-in payload.
pub fn builtin_registry() -> PayloadRegistry {
    let mut registry = PayloadRegistry::new();
    registry
        .register::<AppendPayload>("append")
        .register::<ReturnPayload>("return")
        .register::<SleepPayload>("sleep")
        .register::<FailPayload>("fail")
        .register::<CrashPayload>("crash");
    registry
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::scheduler::job::{JobArgs, JobType};

    fn ctx() -> JobContext {
        JobContext {
            queue: "default".to_string(),
            job_type: JobType::Simple,
            id: "1".to_string(),
        }
    }

    fn args(value: Value) -> JobArgs {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_builtin_names() {
        let registry = builtin_registry();
        assert_eq!(
            registry.names(),
            vec!["append", "crash", "fail", "return", "sleep"]
        );
    }

    #[tokio::test]
    async fn test_append_accumulates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker");
        let registry = builtin_registry();

        for _ in 0..3 {
            let mut payload = registry
                .create("append", args(json!({"path": path, "text": "x"})))
                .unwrap();
            assert_eq!(payload.run(&ctx()).await.unwrap(), None);
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "xxx");
    }

    #[tokio::test]
    async fn test_return_value() {
        let registry = builtin_registry();
        let mut payload = registry
            .create("return", args(json!({"value": {"a": [1, 2]}})))
            .unwrap();

        assert_eq!(payload.run(&ctx()).await.unwrap(), Some(json!({"a": [1, 2]})));
    }

    #[tokio::test]
    async fn test_fail_message() {
        let registry = builtin_registry();
        let mut payload = registry
            .create("fail", args(json!({"message": "boom"})))
            .unwrap();

        let err = payload.run(&ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_sleep_without_args() {
        let registry = builtin_registry();
        let mut payload = registry.create("sleep", JobArgs::new()).unwrap();

        assert_eq!(payload.run(&ctx()).await.unwrap(), None);
    }
}
