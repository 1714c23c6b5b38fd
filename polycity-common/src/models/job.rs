//! Job configuration and progress record

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Progress hash field names
pub mod fields {
    /// JSON-encoded [`super::JobConfig`]
    pub const CONFIG: &str = "config";
    pub const OUTPUT_PATH: &str = "output_path";
    /// Running count of items pushed by Split
    pub const ITEMS_SPLIT: &str = "items_split";
    /// Frozen expected total, set once Split reaches end of input
    pub const ITEMS_ENQUEUED: &str = "items_enqueued";
    /// Bumped once per item, gated by the job's settled set
    pub const ITEMS_COMPLETED: &str = "items_completed";
    pub const ITEMS_FAILED: &str = "items_failed";
    pub const COMPLETED: &str = "completed";
}

/// An external HTTP service endpoint with optional access key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub url: String,
    pub api_key: Option<String>,
}

/// Immutable per-job configuration, written once at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Coordinate system code as given by the user (e.g. `EPSG:25832`)
    pub crs_code: String,
    /// Resolved proj4 definition of the source coordinate system
    pub proj4: String,
    /// Prepended to every building identifier
    pub prefix: Option<String>,
    pub elevation: Option<ServiceEndpoint>,
    pub places: Option<ServiceEndpoint>,
    pub attribution: Option<String>,
    pub license: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-job counters and completion flag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub items_split: u64,
    /// `None` while splitting is still in progress
    pub items_enqueued: Option<u64>,
    pub items_completed: u64,
    pub items_failed: u64,
    pub completed: bool,
}

impl JobProgress {
    /// Build from a raw progress hash; absent counters read as zero
    pub fn from_fields(hash: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            items_split: parse_counter(hash, fields::ITEMS_SPLIT)?.unwrap_or(0),
            items_enqueued: parse_counter(hash, fields::ITEMS_ENQUEUED)?,
            items_completed: parse_counter(hash, fields::ITEMS_COMPLETED)?.unwrap_or(0),
            items_failed: parse_counter(hash, fields::ITEMS_FAILED)?.unwrap_or(0),
            completed: hash
                .get(fields::COMPLETED)
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
        })
    }

    /// Items that reached a terminal outcome (completed or failed)
    pub fn settled(&self) -> u64 {
        self.items_completed + self.items_failed
    }

    /// Items still in flight, when the total is known
    pub fn outstanding(&self) -> Option<u64> {
        self.items_enqueued
            .map(|total| total.saturating_sub(self.settled()))
    }

    /// Accounting invariant for a job that has not completed yet
    pub fn is_consistent(&self) -> bool {
        if self.completed {
            return true;
        }
        match self.items_enqueued {
            None => true,
            Some(total) => self.settled() <= total,
        }
    }
}

fn parse_counter(hash: &HashMap<String, String>, field: &str) -> Result<Option<u64>> {
    hash.get(field)
        .map(|raw| {
            raw.trim().parse::<i64>().map(|v| v.max(0) as u64).map_err(|e| {
                Error::Internal(format!("Corrupt counter {}={:?}: {}", field, raw, e))
            })
        })
        .transpose()
}

/// A job as read back from the coordination store
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub config: JobConfig,
    pub progress: JobProgress,
}

impl Job {
    /// Build from a raw progress hash (config + counters)
    pub fn from_fields(id: &str, hash: &HashMap<String, String>) -> Result<Self> {
        let raw = hash
            .get(fields::CONFIG)
            .ok_or_else(|| Error::NotFound(format!("Job {} has no config", id)))?;
        let config: JobConfig = serde_json::from_str(raw)?;

        Ok(Self {
            id: id.to_string(),
            config,
            progress: JobProgress::from_fields(hash)?,
        })
    }
}
