//! In-process coordination store
//!
//! Same semantics as [`super::SqliteStore`] behind one mutex. Suitable for
//! single-process runs where every worker is a task; state is lost with the
//! process.

use super::CoordinationStore;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, Vec<String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// Mutex-guarded in-memory store
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Internal("memory store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.lock()?
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let hash = inner.hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.lock()?.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut inner = self.lock()?;
        let hash = inner.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|e| {
                Error::Internal(format!("hash field {}/{} is not an integer: {}", key, field, e))
            })?,
            None => 0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        let mut inner = self.lock()?;
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push(value.to_string());
        Ok(list.len() as u64)
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.lock()?.lists.get(key).cloned().unwrap_or_default())
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<u64> {
        let mut inner = self.lock()?;
        let Some(list) = inner.lists.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|v| v != value);
        Ok((before - list.len()) as u64)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .sets
            .get(key)
            .map(|s| s.contains(member))
            .unwrap_or(false))
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        Ok(self.lock()?.sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let removed_hash = inner.hashes.remove(key).is_some();
        let removed_list = inner.lists.remove(key).is_some();
        let removed_set = inner.sets.remove(key).is_some();
        Ok(removed_hash || removed_list || removed_set)
    }
}
