//! polycity library
//!
//! Converts a CityGML document into per-building 3D models plus a GeoJSON
//! footprint index by routing every building through a fixed sequence of
//! queue-fed stages. Exposes the pieces the `polycity` binary wires
//! together so integration tests can drive them in-process.

pub mod capabilities;
pub mod citygml;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod stages;

use polycity_common::config::TimingConfig;
use polycity_common::queue::{MemoryQueue, SqliteQueue, StageQueue};
use polycity_common::store::{CoordinationStore, MemoryStore, SqliteStore};
use std::path::Path;
use std::sync::Arc;

/// Handles shared by the coordinator and every stage worker
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn CoordinationStore>,
    pub queue: Arc<dyn StageQueue>,
    pub timing: TimingConfig,
}

impl PipelineContext {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        queue: Arc<dyn StageQueue>,
        timing: TimingConfig,
    ) -> Self {
        Self {
            store,
            queue,
            timing,
        }
    }

    /// Store and queues on one shared SQLite file
    pub async fn open_sqlite(path: &Path, timing: TimingConfig) -> polycity_common::Result<Self> {
        let pool = polycity_common::db::init_database(path).await?;
        Ok(Self::new(
            Arc::new(SqliteStore::new(pool.clone())),
            Arc::new(SqliteQueue::new(pool)),
            timing,
        ))
    }

    /// Volatile store and queues (single process)
    pub fn in_memory(timing: TimingConfig) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryQueue::new()),
            timing,
        )
    }
}
