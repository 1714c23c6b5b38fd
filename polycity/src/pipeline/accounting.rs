//! Completion and failure accounting
//!
//! Every terminal outcome of an item adds its id to the job's settled set
//! and, the first time only, bumps one counter (`items_completed` or
//! `items_failed`). A redelivered item therefore never counts twice. Each
//! outcome is followed by a completion check that is cheap and idempotent,
//! so any worker (and the Split stage, and resume) may run it; whichever
//! sees every enqueued item settled first aggregates.
//!
//! Writes for a job destroyed in the meantime are swept up again: the
//! progress hash is the first key `destroy` removes, so a writer that finds
//! it gone after writing deletes whatever it recreated.

use super::aggregate::build_index;
use polycity_common::models::{fields, FailureRecord, JobProgress, Stage};
use polycity_common::store::{keys, CoordinationStore};
use polycity_common::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Aggregate index written into the job's output directory
pub const INDEX_FILE: &str = "index.geojson";
/// Failure report, written only when at least one item failed
pub const FAILURE_REPORT_FILE: &str = "failures.json";

#[derive(Clone)]
pub struct Accounting {
    store: Arc<dyn CoordinationStore>,
}

impl Accounting {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Record a permanent per-item failure and count it
    pub async fn isolate(
        &self,
        job_id: &str,
        item_id: &str,
        stage: Stage,
        error: &str,
    ) -> Result<()> {
        if self.is_settled(job_id, item_id).await? {
            debug!(job_id = %job_id, item_id = %item_id, stage = %stage, "Item already settled, failure ignored");
            return Ok(());
        }

        let record = FailureRecord::new(item_id, stage, error);
        self.store
            .rpush(&keys::failures(job_id), &serde_json::to_string(&record)?)
            .await?;
        if self.settle(job_id, item_id, fields::ITEMS_FAILED).await? {
            warn!(
                job_id = %job_id,
                item_id = %item_id,
                stage = %stage,
                "Item isolated: {}",
                error
            );
        }

        if self.sweep_if_destroyed(job_id).await? {
            return Ok(());
        }
        self.check_completion(job_id).await?;
        Ok(())
    }

    /// Record an item that finished the terminal stage with its footprint
    pub async fn complete(
        &self,
        job_id: &str,
        item_id: &str,
        footprint: &serde_json::Value,
    ) -> Result<()> {
        if self.is_settled(job_id, item_id).await? {
            debug!(job_id = %job_id, item_id = %item_id, "Item already settled, completion ignored");
            return Ok(());
        }

        self.store
            .rpush(&keys::footprints(job_id), &footprint.to_string())
            .await?;
        if self.settle(job_id, item_id, fields::ITEMS_COMPLETED).await? {
            debug!(job_id = %job_id, item_id = %item_id, "Item completed");
        }

        if self.sweep_if_destroyed(job_id).await? {
            return Ok(());
        }
        self.check_completion(job_id).await?;
        Ok(())
    }

    async fn is_settled(&self, job_id: &str, item_id: &str) -> Result<bool> {
        self.store.sismember(&keys::settled(job_id), item_id).await
    }

    /// Mark `item_id` settled; bumps `counter` only when it was not already
    async fn settle(&self, job_id: &str, item_id: &str, counter: &str) -> Result<bool> {
        if !self.store.sadd(&keys::settled(job_id), item_id).await? {
            return Ok(false);
        }
        self.store.hincrby(&keys::job(job_id), counter, 1).await?;
        Ok(true)
    }

    /// Delete keys recreated by writes that raced `destroy`
    async fn sweep_if_destroyed(&self, job_id: &str) -> Result<bool> {
        if self
            .store
            .hget(&keys::job(job_id), fields::OUTPUT_PATH)
            .await?
            .is_some()
        {
            return Ok(false);
        }
        for key in keys::all_for_job(job_id) {
            self.store.del(&key).await?;
        }
        debug!(job_id = %job_id, "Job destroyed while recording an outcome, keys swept");
        Ok(true)
    }

    /// Aggregate the job if every item is accounted for
    ///
    /// Returns true when this call wrote the index and flagged the job
    /// completed.
    pub async fn check_completion(&self, job_id: &str) -> Result<bool> {
        let hash = self.store.hgetall(&keys::job(job_id)).await?;
        let Some(output_path) = hash.get(fields::OUTPUT_PATH) else {
            return Ok(false);
        };

        let progress = JobProgress::from_fields(&hash)?;
        if progress.completed {
            return Ok(false);
        }
        // The set is authoritative: a crash between `sadd` and the counter
        // bump leaves the counters one short
        let settled = self.store.scard(&keys::settled(job_id)).await?;
        if !progress.is_consistent() {
            warn!(
                job_id = %job_id,
                enqueued = ?progress.items_enqueued,
                completed = progress.items_completed,
                failed = progress.items_failed,
                settled,
                "Settled count exceeds enqueued total"
            );
        }
        if !matches!(progress.items_enqueued, Some(total) if settled >= total) {
            return Ok(false);
        }

        self.aggregate(job_id, Path::new(output_path)).await
    }

    async fn aggregate(&self, job_id: &str, output_path: &Path) -> Result<bool> {
        let footprints = self.store.lrange_all(&keys::footprints(job_id)).await?;

        // Another worker may have aggregated (and drained the list) between
        // our count check and the read above
        if self.is_completed(job_id).await? {
            return Ok(false);
        }

        tokio::fs::create_dir_all(output_path).await?;

        let index = build_index(&footprints);
        let feature_count = index["features"].as_array().map_or(0, Vec::len);
        tokio::fs::write(index_path(output_path), serde_json::to_vec_pretty(&index)?).await?;

        let failures = self.failures(job_id).await?;
        if !failures.is_empty() {
            tokio::fs::write(
                output_path.join(FAILURE_REPORT_FILE),
                serde_json::to_vec_pretty(&failures)?,
            )
            .await?;
        }

        self.store
            .hset(&keys::job(job_id), fields::COMPLETED, "1")
            .await?;
        self.store.del(&keys::footprints(job_id)).await?;

        info!(
            job_id = %job_id,
            features = feature_count,
            failures = failures.len(),
            output = %output_path.display(),
            "Job completed"
        );
        Ok(true)
    }

    async fn is_completed(&self, job_id: &str) -> Result<bool> {
        Ok(matches!(
            self.store.hget(&keys::job(job_id), fields::COMPLETED).await?.as_deref(),
            Some("1") | Some("true")
        ))
    }

    /// Failure ledger contents, one record per item (unreadable entries skipped)
    pub async fn failures(&self, job_id: &str) -> Result<Vec<FailureRecord>> {
        let raw = self.store.lrange_all(&keys::failures(job_id)).await?;
        let mut seen = HashSet::new();
        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str::<FailureRecord>(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(job_id = %job_id, "Skipping unreadable failure record: {}", e);
                    None
                }
            })
            .filter(|record| seen.insert(record.item_id.clone()))
            .collect())
    }
}

pub fn index_path(output_path: &Path) -> PathBuf {
    output_path.join(INDEX_FILE)
}
