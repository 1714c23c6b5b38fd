//! Coordinator: job start, resume and supervision
//!
//! The coordinator creates (or rediscovers) jobs, launches the stage
//! worker pools, runs the Split stage for jobs that still need it, and
//! polls the store until every supervised job has completed. Completed
//! jobs are destroyed; when none remain the pools are shut down.

use crate::capabilities::epsg::EpsgClient;
use crate::capabilities::Projection;
use crate::config::{elevation_endpoint, places_endpoint, JobRequest};
use crate::pipeline::{Accounting, JobRegistry, WorkerLauncher, WorkerPools};
use crate::stages::Splitter;
use crate::PipelineContext;
use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use polycity_common::config::{is_set, TomlConfig, WorkerPoolConfig};
use polycity_common::models::{Job, JobConfig};
use std::collections::HashSet;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Recorded as the coordinate system code when only proj4 was given
const CUSTOM_CRS: &str = "custom";

/// How a supervision run ended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Jobs that completed and were destroyed
    pub completed: Vec<String>,
    /// Jobs whose split failed; their records were erased
    pub abandoned: Vec<String>,
    /// Stopped by a shutdown request before every job completed
    pub interrupted: bool,
}

/// Validate a conversion request and resolve its projection
///
/// Nothing is written to the store here, so a request that fails (bad
/// coordinate code, unreadable input) leaves no partial state.
pub async fn prepare_job(
    request: &JobRequest,
    toml: &TomlConfig,
    epsg: &EpsgClient,
) -> anyhow::Result<JobConfig> {
    std::fs::File::open(&request.input_path)
        .with_context(|| format!("open input {}", request.input_path.display()))?;

    let (crs_code, projection) = match (&request.proj4, &request.crs_code) {
        (Some(proj4), code) if is_set(proj4) => (
            code.clone().unwrap_or_else(|| CUSTOM_CRS.to_string()),
            Projection::from_proj4(proj4).context("parse proj4 definition")?,
        ),
        (_, Some(code)) if is_set(code) => (
            code.clone(),
            epsg.resolve(code)
                .await
                .with_context(|| format!("resolve coordinate system {}", code))?,
        ),
        _ => bail!("a coordinate system code or proj4 definition is required"),
    };
    info!(crs = %crs_code, proj4 = %projection.definition(), "Resolved source projection");

    Ok(JobConfig {
        input_path: request.input_path.clone(),
        output_path: request.output_path.clone(),
        crs_code,
        proj4: projection.definition().to_string(),
        prefix: request.prefix.clone().filter(|p| is_set(p)),
        elevation: elevation_endpoint(request, toml),
        places: places_endpoint(request, toml),
        attribution: request.attribution.clone().filter(|a| is_set(a)),
        license: request.license.clone().filter(|l| is_set(l)),
        created_at: Utc::now(),
    })
}

pub struct Coordinator {
    ctx: PipelineContext,
    registry: JobRegistry,
    accounting: Accounting,
    pool_sizes: WorkerPoolConfig,
}

impl Coordinator {
    pub fn new(ctx: PipelineContext, pool_sizes: WorkerPoolConfig) -> Self {
        Self {
            registry: JobRegistry::new(ctx.store.clone()),
            accounting: Accounting::new(ctx.store.clone()),
            ctx,
            pool_sizes,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Register a new job and run it to completion
    pub async fn start(
        &self,
        config: JobConfig,
        launcher: &dyn WorkerLauncher,
        shutdown: CancellationToken,
    ) -> anyhow::Result<RunSummary> {
        let job = self.registry.create(config).await?;
        let to_split = vec![job.clone()];
        self.supervise(vec![job.id], to_split, launcher, shutdown)
            .await
    }

    /// Pick up every registered, unfinished job
    ///
    /// Must be the only consumer of the queues while it starts: leases of
    /// the previous run are cleared so their items are redelivered.
    pub async fn resume(
        &self,
        launcher: &dyn WorkerLauncher,
        shutdown: CancellationToken,
    ) -> anyhow::Result<RunSummary> {
        let recovered = self.ctx.queue.recover_abandoned().await?;
        if recovered > 0 {
            info!(recovered, "Released leases of interrupted deliveries");
        }

        let mut jobs = Vec::new();
        let mut to_split = Vec::new();
        for id in self.registry.active_ids().await? {
            let Some(job) = self.registry.load(&id).await? else {
                warn!(job_id = %id, "Active job has no record, removing");
                self.registry.destroy(&id).await?;
                continue;
            };

            if job.progress.completed {
                info!(job_id = %id, "Job already completed, removing");
                self.registry.destroy(&id).await?;
                continue;
            }

            if job.progress.items_enqueued.is_none() {
                info!(job_id = %id, split = job.progress.items_split, "Split incomplete, re-splitting");
                to_split.push(job.clone());
            } else {
                // Covers a crash between the last count and aggregation
                self.accounting.check_completion(&id).await?;
                info!(
                    job_id = %id,
                    outstanding = ?job.progress.outstanding(),
                    "Resuming job"
                );
            }
            jobs.push(id);
        }

        if jobs.is_empty() {
            info!("No unfinished jobs to resume");
            return Ok(RunSummary::default());
        }

        self.supervise(jobs, to_split, launcher, shutdown).await
    }

    async fn supervise(
        &self,
        jobs: Vec<String>,
        to_split: Vec<Job>,
        launcher: &dyn WorkerLauncher,
        shutdown: CancellationToken,
    ) -> anyhow::Result<RunSummary> {
        let mut pools = WorkerPools::spawn(launcher, &self.pool_sizes)?;

        let mut splits = JoinSet::new();
        for job in to_split {
            let splitter = Splitter::new(&self.ctx);
            splits.spawn(async move {
                let result = splitter.run(&job).await;
                (job.id, result)
            });
        }

        let mut summary = RunSummary::default();
        let mut pending: HashSet<String> = jobs.into_iter().collect();
        let outcome = self
            .poll(&mut pending, &mut pools, &mut splits, &shutdown, &mut summary)
            .await;

        splits.shutdown().await;
        pools.shutdown(self.ctx.timing.shutdown_grace()).await;

        if !pending.is_empty() && outcome.is_ok() {
            info!(jobs = pending.len(), "Unfinished jobs stay registered for resume");
        }
        outcome.map(|()| summary)
    }

    async fn poll(
        &self,
        pending: &mut HashSet<String>,
        pools: &mut WorkerPools,
        splits: &mut JoinSet<(String, anyhow::Result<u64>)>,
        shutdown: &CancellationToken,
        summary: &mut RunSummary,
    ) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.ctx.timing.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !pending.is_empty() {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping supervision");
                    summary.interrupted = true;
                    return Ok(());
                }

                Some(exit) = pools.next_exit() => {
                    if exit.requested || shutdown.is_cancelled() {
                        continue;
                    }
                    return Err(anyhow!(
                        "{} worker {} exited unexpectedly: {}",
                        exit.stage,
                        exit.index,
                        exit.detail
                    ));
                }

                Some(joined) = splits.join_next(), if !splits.is_empty() => {
                    let (job_id, result) = joined.context("split task")?;
                    match result {
                        Ok(pushed) => debug!(job_id = %job_id, pushed, "Split task done"),
                        Err(e) => {
                            error!(job_id = %job_id, "Split failed, abandoning job: {:#}", e);
                            self.registry.destroy(&job_id).await?;
                            pending.remove(&job_id);
                            summary.abandoned.push(job_id);
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.poll_jobs(pending, summary).await?;
                }
            }
        }

        Ok(())
    }

    async fn poll_jobs(
        &self,
        pending: &mut HashSet<String>,
        summary: &mut RunSummary,
    ) -> anyhow::Result<()> {
        let mut ids: Vec<String> = pending.iter().cloned().collect();
        ids.sort();

        for id in ids {
            match self.registry.progress(&id).await? {
                None => {
                    warn!(job_id = %id, "Job record disappeared");
                    pending.remove(&id);
                }
                Some(progress) if progress.completed => {
                    self.registry.destroy(&id).await?;
                    pending.remove(&id);
                    summary.completed.push(id);
                }
                Some(progress) => {
                    debug!(
                        job_id = %id,
                        split = progress.items_split,
                        enqueued = ?progress.items_enqueued,
                        completed = progress.items_completed,
                        failed = progress.items_failed,
                        "Job progress"
                    );
                }
            }
        }
        Ok(())
    }
}
