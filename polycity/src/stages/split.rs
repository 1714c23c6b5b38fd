//! Split stage
//!
//! Streams `bldg:Building` fragments out of the job's input document and
//! pushes one work item per building to the Repair queue. Re-running a
//! split is idempotent: identifiers already in the job's dedup set are
//! skipped, and buildings without `gml:id` reuse the identifier generated
//! for their position on the first run.
//!
//! Errors here are fatal to the job (there are no items to isolate yet).

use crate::citygml::{BuildingFragment, BuildingReader, CitygmlError};
use crate::pipeline::Accounting;
use crate::PipelineContext;
use anyhow::{anyhow, Context};
use polycity_common::config::TimingConfig;
use polycity_common::models::{fields, Job, Stage, WorkItem};
use polycity_common::queue::StageQueue;
use polycity_common::store::{keys, CoordinationStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Fragments read ahead of the enqueue loop
const FRAGMENT_BUFFER: usize = 64;

pub struct Splitter {
    store: Arc<dyn CoordinationStore>,
    queue: Arc<dyn StageQueue>,
    timing: TimingConfig,
}

impl Splitter {
    pub fn new(ctx: &PipelineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            queue: ctx.queue.clone(),
            timing: ctx.timing.clone(),
        }
    }

    /// Split the job's input; returns the number of items this run pushed
    pub async fn run(&self, job: &Job) -> anyhow::Result<u64> {
        let input = job.config.input_path.clone();
        info!(job_id = %job.id, input = %input.display(), "Splitting input");

        let (tx, mut rx) = mpsc::channel::<BuildingFragment>(FRAGMENT_BUFFER);
        let path = input.clone();
        let reader = tokio::task::spawn_blocking(move || -> Result<(), CitygmlError> {
            for fragment in BuildingReader::open(&path)? {
                // Receiver dropped: the enqueue loop failed and reported it
                if tx.blocking_send(fragment?).is_err() {
                    break;
                }
            }
            Ok(())
        });

        let mut pushed = 0u64;
        let mut skipped = 0u64;
        while let Some(fragment) = rx.recv().await {
            if self.enqueue(job, fragment).await? {
                pushed += 1;
            } else {
                skipped += 1;
            }
        }

        reader
            .await
            .context("input reader task")?
            .with_context(|| format!("read {}", input.display()))?;

        // Let pushes from a concurrent split of the same job land
        tokio::time::sleep(self.timing.split_settle()).await;

        let job_key = keys::job(&job.id);
        let total = match self.store.hget(&job_key, fields::ITEMS_SPLIT).await? {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("corrupt {} for job {}", fields::ITEMS_SPLIT, job.id))?,
            None => 0,
        };
        self.store
            .hset(&job_key, fields::ITEMS_ENQUEUED, &total.to_string())
            .await?;
        self.store.del(&keys::dedup(&job.id)).await?;

        info!(job_id = %job.id, pushed, skipped, total, "Split finished, total frozen");

        Accounting::new(self.store.clone())
            .check_completion(&job.id)
            .await?;
        Ok(pushed)
    }

    /// Push one fragment unless its identifier was already split
    async fn enqueue(&self, job: &Job, fragment: BuildingFragment) -> anyhow::Result<bool> {
        let original_id = match fragment.gml_id {
            Some(id) => id,
            None => self.generated_id(&job.id, fragment.ordinal).await?,
        };
        let id = format!("{}{}", job.config.prefix.as_deref().unwrap_or(""), original_id);

        let dedup = keys::dedup(&job.id);
        if self.store.sismember(&dedup, &id).await? {
            debug!(job_id = %job.id, item_id = %id, "Already split, skipping");
            return Ok(false);
        }

        let item = WorkItem::new(&job.id, &id, &original_id, fragment.xml);
        self.queue.push(Stage::Repair, &item).await?;
        self.store.sadd(&dedup, &id).await?;
        self.store
            .hincrby(&keys::job(&job.id), fields::ITEMS_SPLIT, 1)
            .await?;
        Ok(true)
    }

    /// Identifier for a building without `gml:id`, stable across re-splits
    async fn generated_id(&self, job_id: &str, ordinal: u64) -> anyhow::Result<String> {
        let key = keys::generated_ids(job_id);
        let field = ordinal.to_string();
        self.store
            .hset_nx(&key, &field, &Uuid::new_v4().to_string())
            .await?;
        self.store
            .hget(&key, &field)
            .await?
            .ok_or_else(|| anyhow!("generated id for element {} vanished", ordinal))
    }
}
