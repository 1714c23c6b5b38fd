//! Job registry
//!
//! A job is a progress hash (config, output path, counters, completed flag)
//! plus an entry in the global active-job list. The hash is written before
//! the list entry, so a resume scan never sees an id without a record.

use polycity_common::models::{fields, Job, JobConfig, JobProgress};
use polycity_common::store::{keys, CoordinationStore};
use polycity_common::Result;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobRegistry {
    store: Arc<dyn CoordinationStore>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Register a new job
    pub async fn create(&self, config: JobConfig) -> Result<Job> {
        let id = Uuid::new_v4().to_string();
        let key = keys::job(&id);

        self.store
            .hset(&key, fields::CONFIG, &serde_json::to_string(&config)?)
            .await?;
        self.store
            .hset(&key, fields::OUTPUT_PATH, &config.output_path.to_string_lossy())
            .await?;
        self.store.rpush(&keys::active_jobs(), &id).await?;

        info!(job_id = %id, input = %config.input_path.display(), "Created job");

        Ok(Job {
            id,
            config,
            progress: JobProgress::default(),
        })
    }

    /// Job record with current progress; `None` once destroyed
    pub async fn load(&self, job_id: &str) -> Result<Option<Job>> {
        let hash = self.store.hgetall(&keys::job(job_id)).await?;
        if !hash.contains_key(fields::CONFIG) {
            return Ok(None);
        }
        Job::from_fields(job_id, &hash).map(Some)
    }

    /// Current counters; `None` once destroyed
    pub async fn progress(&self, job_id: &str) -> Result<Option<JobProgress>> {
        let hash = self.store.hgetall(&keys::job(job_id)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        JobProgress::from_fields(&hash).map(Some)
    }

    /// Job still has a record
    pub async fn exists(&self, job_id: &str) -> Result<bool> {
        Ok(self
            .store
            .hget(&keys::job(job_id), fields::OUTPUT_PATH)
            .await?
            .is_some())
    }

    /// Registered job ids, oldest first (duplicates removed)
    pub async fn active_ids(&self) -> Result<Vec<String>> {
        let mut ids = self.store.lrange_all(&keys::active_jobs()).await?;
        let mut seen = std::collections::HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        Ok(ids)
    }

    /// Erase every key of a job and drop it from the active list
    pub async fn destroy(&self, job_id: &str) -> Result<()> {
        for key in keys::all_for_job(job_id) {
            self.store.del(&key).await?;
        }
        self.store.lrem(&keys::active_jobs(), job_id).await?;
        info!(job_id = %job_id, "Destroyed job record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use polycity_common::store::MemoryStore;
    use std::path::PathBuf;

    fn config() -> JobConfig {
        JobConfig {
            input_path: PathBuf::from("in.gml"),
            output_path: PathBuf::from("out"),
            crs_code: "EPSG:4326".to_string(),
            proj4: "+proj=longlat +datum=WGS84 +no_defs".to_string(),
            prefix: None,
            elevation: None,
            places: None,
            attribution: None,
            license: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_load_destroy() {
        let store = Arc::new(MemoryStore::new());
        let registry = JobRegistry::new(store.clone());

        let job = registry.create(config()).await.unwrap();
        assert_eq!(registry.active_ids().await.unwrap(), vec![job.id.clone()]);

        let loaded = registry.load(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.config, job.config);
        assert!(registry.exists(&job.id).await.unwrap());

        store.sadd(&keys::dedup(&job.id), "b1").await.unwrap();
        registry.destroy(&job.id).await.unwrap();

        assert!(registry.load(&job.id).await.unwrap().is_none());
        assert!(registry.progress(&job.id).await.unwrap().is_none());
        assert!(registry.active_ids().await.unwrap().is_empty());
        assert_eq!(store.scard(&keys::dedup(&job.id)).await.unwrap(), 0);
    }
}
