//! In-process [`Store`] implementation.
//!
//! Mirrors the Redis semantics the scheduler relies on: keys are typed,
//! empty sets disappear, sorted sets are ordered by `(score, member)` and
//! `KEYS` understands `*` and `?` globs. State lives behind a single async
//! mutex, so every call is atomic just like a Redis command.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Store, StoreError};

#[derive(Debug, Default)]
struct Data {
    strings: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, HashMap<String, i64>>,
}

impl Data {
    fn sorted(&self, key: &str) -> Vec<(String, i64)> {
        let mut entries: Vec<(String, i64)> = self
            .zsets
            .get(key)
            .map(|zset| zset.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

/// Store that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.lock().await.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data
            .lock()
            .await
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut data = self.data.lock().await;
        let removed = data.strings.remove(key).is_some()
            | data.sets.remove(key).is_some()
            | data.zsets.remove(key).is_some();
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let data = self.data.lock().await;
        Ok(data.strings.contains_key(key)
            || data.sets.contains_key(key)
            || data.zsets.contains_key(key))
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut data = self.data.lock().await;
        let current = data
            .strings
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        data.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut data = self.data.lock().await;
        Ok(data
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut data = self.data.lock().await;
        let Some(set) = data.sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.is_empty() {
            data.sets.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.data.lock().await.sets.get(key).map_or(0, BTreeSet::len))
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let data = self.data.lock().await;
        Ok(data.sets.get(key).is_some_and(|set| set.contains(member)))
    }

    async fn spop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut data = self.data.lock().await;
        let Some(set) = data.sets.get_mut(key) else {
            return Ok(None);
        };
        let popped = set.pop_first();
        if set.is_empty() {
            data.sets.remove(key);
        }
        Ok(popped)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut data = self.data.lock().await;
        data.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut data = self.data.lock().await;
        let Some(zset) = data.zsets.get_mut(key) else {
            return Ok(false);
        };
        let removed = zset.remove(member).is_some();
        if zset.is_empty() {
            data.zsets.remove(key);
        }
        Ok(removed)
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: i64,
        max: i64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .sorted(key)
            .into_iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .skip(offset)
            .take(count)
            .map(|(member, _)| member)
            .collect())
    }

    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, i64)>, StoreError> {
        Ok(self.data.lock().await.sorted(key))
    }

    async fn zrank(&self, key: &str, member: &str) -> Result<Option<usize>, StoreError> {
        let data = self.data.lock().await;
        Ok(data.sorted(key).iter().position(|(m, _)| m == member))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.lock().await;
        let mut keys: Vec<String> = data
            .strings
            .keys()
            .chain(data.sets.keys())
            .chain(data.zsets.keys())
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Matches `text` against a glob supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
