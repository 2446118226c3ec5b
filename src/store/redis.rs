//! Redis-backed [`Store`] implementation.
//!
//! Uses a single [`ConnectionManager`] per process. The manager reconnects
//! automatically and is cheap to clone, so each call works on its own clone.
//! A connection must never be shared across a process boundary: job
//! subprocesses open their own [`RedisStore`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{Store, StoreError};

/// Store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.exists(key).await?)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.incr(key, 1).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let added: usize = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let removed: usize = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn scard(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.scard(key).await?)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.sismember(key, member).await?)
    }

    async fn spop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.spop(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let removed: usize = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: i64,
        max: i64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.redis.clone();
        Ok(conn
            .zrangebyscore_limit(key, min, max, offset as isize, count as isize)
            .await?)
    }

    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let mut conn = self.redis.clone();
        let entries: Vec<(String, f64)> = conn.zrange_withscores(key, 0, -1).await?;
        Ok(entries
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    async fn zrank(&self, key: &str, member: &str) -> Result<Option<usize>, StoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.zrank(key, member).await?)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.keys(pattern).await?)
    }
}
