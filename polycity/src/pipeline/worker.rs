//! Stage worker runtime
//!
//! One worker pulls one delivery at a time from its stage's queue, runs
//! the stage handler, and either forwards the enriched item or isolates it
//! as failed. The delivery is acknowledged only after that outcome has been
//! written, so a crash at any point leads to redelivery rather than loss.
//!
//! Cancellation is observed only between items: an in-flight item always
//! runs to its outcome before the worker returns.

use super::{Accounting, JobRegistry, StageHandler, StageOutcome};
use crate::error::StageError;
use crate::PipelineContext;
use anyhow::Context;
use polycity_common::models::{Job, Stage, WorkItem};
use polycity_common::queue::Delivery;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct StageWorker {
    ctx: PipelineContext,
    handler: Arc<dyn StageHandler>,
    accounting: Accounting,
    registry: JobRegistry,
    /// Job configs are immutable once created
    jobs: Mutex<HashMap<String, Arc<Job>>>,
}

impl StageWorker {
    pub fn new(ctx: PipelineContext, handler: Arc<dyn StageHandler>) -> Self {
        Self {
            accounting: Accounting::new(ctx.store.clone()),
            registry: JobRegistry::new(ctx.store.clone()),
            ctx,
            handler,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn stage(&self) -> Stage {
        self.handler.stage()
    }

    /// Process items until `shutdown` fires or a fatal error occurs
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let stage = self.stage();
        info!(stage = %stage, "Stage worker started");

        while !shutdown.is_cancelled() {
            if self.process_next().await? {
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.ctx.timing.idle_pull()) => {}
            }
        }

        info!(stage = %stage, "Stage worker stopped");
        Ok(())
    }

    /// Handle at most one delivery; returns false when the queue was empty
    pub async fn process_next(&self) -> anyhow::Result<bool> {
        let stage = self.stage();
        let Some(delivery) = self
            .ctx
            .queue
            .pull(stage, self.ctx.timing.lease())
            .await
            .with_context(|| format!("pull from {}", stage.queue_name()))?
        else {
            return Ok(false);
        };

        self.process(delivery).await?;
        Ok(true)
    }

    async fn process(&self, delivery: Delivery) -> anyhow::Result<()> {
        let stage = self.stage();

        let item = match delivery.decode() {
            Ok(item) => item,
            Err(e) => {
                // No job id to account against
                error!(stage = %stage, delivery = delivery.id, "Dropping undecodable payload: {}", e);
                return self.ack(&delivery).await;
            }
        };

        let Some(job) = self.job(&item.job_id).await? else {
            warn!(
                stage = %stage,
                job_id = %item.job_id,
                item_id = %item.id,
                "Dropping item of a job that no longer exists"
            );
            return self.ack(&delivery).await;
        };

        if delivery.attempts > self.ctx.timing.max_deliveries {
            self.accounting
                .isolate(
                    &job.id,
                    &item.id,
                    stage,
                    &format!("delivery attempts exhausted ({})", delivery.attempts - 1),
                )
                .await?;
            return self.ack(&delivery).await;
        }

        let item_id = item.id.clone();
        debug!(stage = %stage, job_id = %job.id, item_id = %item_id, attempt = delivery.attempts, "Handling item");

        match self.handler.handle(&job, item).await {
            Ok(StageOutcome::Forward(next, item)) => {
                self.forward(next, &item).await?;
            }
            Ok(StageOutcome::Completed { footprint }) => {
                self.accounting
                    .complete(&job.id, &item_id, &footprint)
                    .await?;
            }
            Err(StageError::Isolable(message)) => {
                self.accounting
                    .isolate(&job.id, &item_id, stage, &message)
                    .await?;
            }
            Err(StageError::Fatal(err)) => {
                if let Err(release_err) = self.ctx.queue.release(delivery.id).await {
                    warn!(stage = %stage, "Release after fatal error failed: {}", release_err);
                }
                return Err(err.context(format!("{} stage, item {}", stage, item_id)));
            }
        }

        self.ack(&delivery).await
    }

    async fn forward(&self, next: Stage, item: &WorkItem) -> anyhow::Result<()> {
        self.ctx
            .queue
            .push(next, item)
            .await
            .with_context(|| format!("push to {}", next.queue_name()))?;
        debug!(from = %self.stage(), to = %next, item_id = %item.id, "Forwarded item");
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> anyhow::Result<()> {
        self.ctx
            .queue
            .ack(delivery.id)
            .await
            .with_context(|| format!("ack delivery {}", delivery.id))
    }

    /// Job with its config; `None` once the job has been destroyed
    async fn job(&self, job_id: &str) -> anyhow::Result<Option<Arc<Job>>> {
        if !self.registry.exists(job_id).await? {
            self.jobs.lock().await.remove(job_id);
            return Ok(None);
        }

        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get(job_id) {
            return Ok(Some(job.clone()));
        }
        let Some(job) = self.registry.load(job_id).await? else {
            return Ok(None);
        };
        let job = Arc::new(job);
        jobs.insert(job_id.to_string(), job.clone());
        Ok(Some(job))
    }
}
