//! Durable stage queues
//!
//! One named queue per stage boundary. Delivery is at-least-once: a pulled
//! payload is leased, not removed, and becomes visible again when the lease
//! expires without an acknowledgment. Consumers acknowledge only after the
//! item has been forwarded or isolated.

pub mod memory;
pub mod sqlite;

use crate::models::{Stage, WorkItem};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

/// One leased payload
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Queue-assigned identifier used for `ack`/`release`
    pub id: i64,
    /// Number of times this payload has been handed out (this one included)
    pub attempts: u32,
    /// Serialized [`WorkItem`]
    pub payload: String,
}

impl Delivery {
    pub fn decode(&self) -> Result<WorkItem> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[async_trait]
pub trait StageQueue: Send + Sync {
    /// Append a payload to the stage's queue
    async fn push(&self, stage: Stage, item: &WorkItem) -> Result<i64>;

    /// Lease the oldest visible payload, if any
    async fn pull(&self, stage: Stage, lease: Duration) -> Result<Option<Delivery>>;

    /// Remove a delivered payload for good
    async fn ack(&self, delivery_id: i64) -> Result<()>;

    /// Drop the lease so the payload is redelivered immediately
    async fn release(&self, delivery_id: i64) -> Result<()>;

    /// Payloads in the queue, leased or not
    async fn len(&self, stage: Stage) -> Result<u64>;

    /// Clear every outstanding lease. Only valid when no consumer is alive
    /// (coordinator start-up before a resume).
    async fn recover_abandoned(&self) -> Result<u64>;
}

pub(crate) fn encode(item: &WorkItem) -> Result<String> {
    Ok(serde_json::to_string(item)?)
}
