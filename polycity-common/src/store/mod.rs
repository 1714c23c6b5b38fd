//! Coordination store
//!
//! The single source of truth for job and work-item state shared by the
//! coordinator and every stage worker. The interface mirrors a networked
//! key-value store: hashes, append-only lists, sets and atomic counters.
//! Every cross-process decision is expressed through one of these atomic
//! primitives; callers never read-modify-write a value.

pub mod keys;
pub mod memory;
pub mod sqlite;

use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Atomic key-value primitives
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set a hash field, overwriting any previous value
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Set a hash field only if absent; returns true when this call set it
    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// All fields of a hash (empty map when the key does not exist)
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Atomically add `delta` to an integer hash field (absent reads as 0);
    /// returns the new value
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Append to a list; returns the new list length
    async fn rpush(&self, key: &str, value: &str) -> Result<u64>;

    /// Whole list in insertion order
    async fn lrange_all(&self, key: &str) -> Result<Vec<String>>;

    /// Remove every occurrence of `value`; returns the number removed
    async fn lrem(&self, key: &str, value: &str) -> Result<u64>;

    /// Add a set member; returns true when the member was not present
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    async fn scard(&self, key: &str) -> Result<u64>;

    /// Delete a key of any type; returns true when something was removed
    async fn del(&self, key: &str) -> Result<bool>;
}
