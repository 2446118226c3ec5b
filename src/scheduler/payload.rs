//! Payload trait and registry.
//!
//! A job record names its payload by string. The [`PayloadRegistry`] maps
//! that name to a factory which binds the record's arguments to a fresh
//! [`Payload`] value. Payloads registered with [`PayloadRegistry::register`]
//! bind arguments by field name through `serde`: a payload struct with a
//! `path` field receives `args["path"]`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::PayloadError;

use super::job::{Job, JobArgs, JobType};

/// Identity of the job a payload runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub queue: String,
    pub job_type: JobType,
    pub id: String,
}

impl JobContext {
    /// Creates the context of `job`.
    pub fn from_job(job: &Job) -> Self {
        Self {
            queue: job.queue.clone(),
            job_type: job.job_type,
            id: job.id.clone(),
        }
    }
}

/// The work a job performs.
#[async_trait]
pub trait Payload: Send {
    /// Runs the payload. A non-null return value is stored as the job result;
    /// an error marks the run as failed and leads to a retry.
    async fn run(&mut self, ctx: &JobContext) -> anyhow::Result<Option<Value>>;
}

/// Builds a payload from job arguments.
pub type PayloadFactory =
    Arc<dyn Fn(JobArgs) -> Result<Box<dyn Payload>, PayloadError> + Send + Sync>;

/// Registry mapping payload names to factories.
#[derive(Clone, Default)]
pub struct PayloadRegistry {
    factories: HashMap<String, PayloadFactory>,
}

impl PayloadRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers payload type `P` under `name`, binding arguments by field name.
    pub fn register<P>(&mut self, name: impl Into<String>) -> &mut Self
    where
        P: Payload + DeserializeOwned + 'static,
    {
        let name = name.into();
        let payload_name = name.clone();
        let factory: PayloadFactory = Arc::new(move |args: JobArgs| {
            let payload: P = serde_json::from_value(Value::Object(args)).map_err(|source| {
                PayloadError::InvalidArgs {
                    payload: payload_name.clone(),
                    source,
                }
            })?;
            Ok(Box::new(payload) as Box<dyn Payload>)
        });
        self.factories.insert(name, factory);
        self
    }

    /// Registers a custom factory under `name`.
    pub fn register_with<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(JobArgs) -> Result<Box<dyn Payload>, PayloadError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Creates the payload registered under `name` with `args` bound.
    pub fn create(&self, name: &str, args: JobArgs) -> Result<Box<dyn Payload>, PayloadError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PayloadError::UnknownPayload(name.to_string()))?;
        factory(args)
    }

    /// Returns whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List all registered payload names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
