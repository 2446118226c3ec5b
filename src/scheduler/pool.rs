//! Typed handles over the named sets, sorted sets and strings in the store.
//!
//! All key names are derived by [`KeySpace`]; nothing else in the crate
//! concatenates key strings. [`Pools`] is built once per scheduler and hands
//! out pool handles for the fixed pools and the per-queue, per-worker and
//! per-job ones.
//!
//! Key layout (relative to the prefix):
//!
//! | key | kind |
//! |---|---|
//! | `job:<id>` | job record |
//! | `result:<id>` | job result |
//! | `interval:<id>` | legacy repeatable interval |
//! | `pids` | set of worker pids |
//! | `children:<worker pid>` | set of child pids |
//! | `executing` | sorted set, job id scored by owning pid |
//! | `completed`, `failed` | sets of job ids |
//! | `queue:<name>:<type>` | job pool of one queue discipline |
//! | `workers:<queue>` | pid of the worker owning a queue |
//! | `counter` | id generator |

use std::sync::Arc;

use crate::store::{Store, StoreError};

use super::job::JobType;

/// Derives every store key from a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Creates a key space under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    pub fn job(&self, id: &str) -> String {
        self.key(&format!("job:{}", id))
    }

    /// Pattern matching every job record.
    pub fn job_pattern(&self) -> String {
        self.key("job:*")
    }

    /// Extracts the job id from a job record key.
    pub fn job_id_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.prefix)?.strip_prefix(":job:")
    }

    pub fn result(&self, id: &str) -> String {
        self.key(&format!("result:{}", id))
    }

    pub fn interval(&self, id: &str) -> String {
        self.key(&format!("interval:{}", id))
    }

    pub fn pids(&self) -> String {
        self.key("pids")
    }

    pub fn children(&self, worker_pid: u32) -> String {
        self.key(&format!("children:{}", worker_pid))
    }

    /// Pattern matching every per-worker child pool.
    pub fn children_pattern(&self) -> String {
        self.key("children:*")
    }

    pub fn executing(&self) -> String {
        self.key("executing")
    }

    pub fn completed(&self) -> String {
        self.key("completed")
    }

    pub fn failed(&self) -> String {
        self.key("failed")
    }

    pub fn queue(&self, queue: &str, job_type: JobType) -> String {
        self.key(&format!("queue:{}:{}", queue, job_type.as_str()))
    }

    pub fn worker(&self, queue: &str) -> String {
        self.key(&format!("workers:{}", queue))
    }

    pub fn counter(&self) -> String {
        self.key("counter")
    }
}

/// Handle over an unordered set.
#[derive(Clone)]
pub struct SetPool {
    store: Arc<dyn Store>,
    key: String,
}

impl SetPool {
    pub fn new(store: Arc<dyn Store>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn add(&self, member: &str) -> Result<bool, StoreError> {
        self.store.sadd(&self.key, member).await
    }

    pub async fn remove(&self, member: &str) -> Result<bool, StoreError> {
        self.store.srem(&self.key, member).await
    }

    pub async fn members(&self) -> Result<Vec<String>, StoreError> {
        self.store.smembers(&self.key).await
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.scard(&self.key).await
    }

    pub async fn contains(&self, member: &str) -> Result<bool, StoreError> {
        self.store.sismember(&self.key, member).await
    }

    /// Removes and returns an arbitrary member.
    pub async fn pop(&self) -> Result<Option<String>, StoreError> {
        self.store.spop(&self.key).await
    }
}

/// Handle over a sorted set.
#[derive(Clone)]
pub struct SortedSetPool {
    store: Arc<dyn Store>,
    key: String,
}

impl SortedSetPool {
    pub fn new(store: Arc<dyn Store>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn add(&self, member: &str, score: i64) -> Result<(), StoreError> {
        self.store.zadd(&self.key, member, score).await
    }

    pub async fn remove(&self, member: &str) -> Result<bool, StoreError> {
        self.store.zrem(&self.key, member).await
    }

    /// Returns the member with the lowest score not above `max`.
    pub async fn first_due(&self, max: i64) -> Result<Option<String>, StoreError> {
        let mut ids = self.store.zrangebyscore(&self.key, i64::MIN, max, 0, 1).await?;
        Ok(ids.pop())
    }

    /// Returns every `(member, score)` pair.
    pub async fn entries(&self) -> Result<Vec<(String, i64)>, StoreError> {
        self.store.zrange_withscores(&self.key).await
    }

    pub async fn contains(&self, member: &str) -> Result<bool, StoreError> {
        Ok(self.store.zrank(&self.key, member).await?.is_some())
    }
}

/// Handle over a single string value.
#[derive(Clone)]
pub struct StringKey {
    store: Arc<dyn Store>,
    key: String,
}

impl StringKey {
    pub fn new(store: Arc<dyn Store>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn get(&self) -> Result<Option<String>, StoreError> {
        self.store.get(&self.key).await
    }

    pub async fn set(&self, value: &str) -> Result<(), StoreError> {
        self.store.set(&self.key, value).await
    }

    pub async fn delete(&self) -> Result<bool, StoreError> {
        self.store.del(&self.key).await
    }

    pub async fn exists(&self) -> Result<bool, StoreError> {
        self.store.exists(&self.key).await
    }
}

/// The pool holding a queue's jobs of one discipline.
#[derive(Clone)]
pub enum JobPool {
    Simple(SetPool),
    Scheduled(SortedSetPool),
    Repeatable(SortedSetPool),
}

impl JobPool {
    /// Removes `id` from the pool.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        match self {
            JobPool::Simple(pool) => pool.remove(id).await,
            JobPool::Scheduled(pool) | JobPool::Repeatable(pool) => pool.remove(id).await,
        }
    }

    /// Returns whether `id` is in the pool.
    pub async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        match self {
            JobPool::Simple(pool) => pool.contains(id).await,
            JobPool::Scheduled(pool) | JobPool::Repeatable(pool) => pool.contains(id).await,
        }
    }
}

/// Collection of every pool the scheduler uses.
#[derive(Clone)]
pub struct Pools {
    store: Arc<dyn Store>,
    keys: KeySpace,
    /// Global worker pid pool.
    pub pids: SetPool,
    /// Job id scored by the pid executing it.
    pub executing: SortedSetPool,
    /// Ids of successfully completed jobs.
    pub completed: SetPool,
    /// Ids of permanently failed jobs.
    pub failed: SetPool,
    /// Id generator.
    pub counter: StringKey,
}

impl Pools {
    pub fn new(store: Arc<dyn Store>, keys: KeySpace) -> Self {
        Self {
            pids: SetPool::new(store.clone(), keys.pids()),
            executing: SortedSetPool::new(store.clone(), keys.executing()),
            completed: SetPool::new(store.clone(), keys.completed()),
            failed: SetPool::new(store.clone(), keys.failed()),
            counter: StringKey::new(store.clone(), keys.counter()),
            store,
            keys,
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn simple(&self, queue: &str) -> SetPool {
        SetPool::new(self.store.clone(), self.keys.queue(queue, JobType::Simple))
    }

    pub fn scheduled(&self, queue: &str) -> SortedSetPool {
        SortedSetPool::new(self.store.clone(), self.keys.queue(queue, JobType::Scheduled))
    }

    pub fn repeatable(&self, queue: &str) -> SortedSetPool {
        SortedSetPool::new(self.store.clone(), self.keys.queue(queue, JobType::Repeatable))
    }

    /// Returns the pool holding jobs of `job_type` in `queue`.
    pub fn job_pool(&self, queue: &str, job_type: JobType) -> JobPool {
        match job_type {
            JobType::Simple => JobPool::Simple(self.simple(queue)),
            JobType::Scheduled => JobPool::Scheduled(self.scheduled(queue)),
            JobType::Repeatable => JobPool::Repeatable(self.repeatable(queue)),
        }
    }

    /// Child pid pool of one worker.
    pub fn children(&self, worker_pid: u32) -> SetPool {
        SetPool::new(self.store.clone(), self.keys.children(worker_pid))
    }

    /// Every child pid pool currently present in the store.
    pub async fn all_children(&self) -> Result<Vec<SetPool>, StoreError> {
        let keys = self.store.keys(&self.keys.children_pattern()).await?;
        Ok(keys
            .into_iter()
            .map(|key| SetPool::new(self.store.clone(), key))
            .collect())
    }

    /// Pid of the worker currently bound to `queue`.
    pub fn worker(&self, queue: &str) -> StringKey {
        StringKey::new(self.store.clone(), self.keys.worker(queue))
    }

    pub fn job_record(&self, id: &str) -> StringKey {
        StringKey::new(self.store.clone(), self.keys.job(id))
    }

    pub fn result(&self, id: &str) -> StringKey {
        StringKey::new(self.store.clone(), self.keys.result(id))
    }

    /// Legacy side-channel interval of a repeatable job.
    pub fn interval(&self, id: &str) -> StringKey {
        StringKey::new(self.store.clone(), self.keys.interval(id))
    }
}
