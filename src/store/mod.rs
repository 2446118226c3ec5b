//! Key/value and (sorted) set store used by the scheduler.
//!
//! The scheduler never talks to Redis directly. Everything goes through the
//! [`Store`] trait, which exposes the handful of primitives the queue
//! disciplines, pid pools and health checks need:
//!
//! - strings: `GET`, `SET`, `DEL`, `EXISTS`, `INCR`
//! - unordered sets: `SADD`, `SREM`, `SMEMBERS`, `SCARD`, `SISMEMBER`, `SPOP`
//! - sorted sets: `ZADD`, `ZREM`, `ZRANGEBYSCORE ... LIMIT`, `ZRANGE ... WITHSCORES`, `ZRANK`
//! - key enumeration: `KEYS pattern`
//!
//! Every call is a single atomic primitive. Multi-step sequences are not
//! wrapped in transactions.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors that can occur while talking to the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Primitives the scheduler requires from the backing store.
///
/// Sorted set scores are integers: unix timestamps for job pools and pids
/// for the executing pool.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the string stored at `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` at `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Deletes `key`. Returns whether a key was removed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns whether `key` exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically increments the integer at `key` and returns the new value.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Adds `member` to the set at `key`. Returns whether it was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Removes `member` from the set at `key`. Returns whether it was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Returns all members of the set at `key`.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Returns the cardinality of the set at `key`.
    async fn scard(&self, key: &str) -> Result<usize, StoreError>;

    /// Returns whether `member` belongs to the set at `key`.
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Removes and returns an arbitrary member of the set at `key`.
    async fn spop(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Adds `member` with `score` to the sorted set at `key`, updating the
    /// score if the member is already present.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError>;

    /// Removes `member` from the sorted set at `key`. Returns whether it was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Returns members with `min <= score <= max`, ordered by score, skipping
    /// `offset` and returning at most `count`.
    async fn zrangebyscore(
        &self,
        key: &str,
        min: i64,
        max: i64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Returns every `(member, score)` pair of the sorted set at `key`.
    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, i64)>, StoreError>;

    /// Returns the rank of `member` in the sorted set at `key`.
    async fn zrank(&self, key: &str, member: &str) -> Result<Option<usize>, StoreError>;

    /// Returns all keys matching a glob `pattern`.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));
        assert!(err.to_string().contains("connection failed"));
    }
}
