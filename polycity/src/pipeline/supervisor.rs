//! Worker pool supervision
//!
//! The coordinator owns a fixed number of workers per stage. A worker is
//! either a child OS process (`polycity worker --stage ..`) or, for
//! single-process runs, a tokio task; both sit behind [`WorkerLauncher`].
//!
//! Shutdown is two-phased: `stop` asks every worker to finish its current
//! item and exit (SIGINT for processes), then after the grace period
//! `kill` terminates whatever is still running.

use super::StageWorker;
use crate::capabilities::Capabilities;
use crate::stages;
use crate::PipelineContext;
use anyhow::Context;
use futures::future::{join_all, BoxFuture};
use polycity_common::config::WorkerPoolConfig;
use polycity_common::models::Stage;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for killed workers to be reaped
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Notification that one worker has exited
#[derive(Debug, Clone)]
pub struct WorkerExit {
    pub stage: Stage,
    pub index: usize,
    /// Exit status or error description
    pub detail: String,
    /// True when the exit followed a stop request
    pub requested: bool,
}

pub trait WorkerLauncher: Send + Sync {
    /// Start one worker
    ///
    /// The returned future resolves with a description of how the worker
    /// ended. It must honour `stop` (finish the current item, then exit) and
    /// `kill` (terminate now).
    fn launch(
        &self,
        stage: Stage,
        index: usize,
        stop: CancellationToken,
        kill: CancellationToken,
    ) -> anyhow::Result<BoxFuture<'static, String>>;
}

/// Launches each worker as a child process of the current executable
pub struct ProcessLauncher {
    program: PathBuf,
    store_path: PathBuf,
    config_path: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(store_path: PathBuf, config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let program = std::env::current_exe().context("locate polycity executable")?;
        Ok(Self::with_program(program, store_path, config_path))
    }

    /// Launch workers from an explicit `polycity` binary
    pub fn with_program(program: PathBuf, store_path: PathBuf, config_path: Option<PathBuf>) -> Self {
        Self {
            program,
            store_path,
            config_path,
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        stage: Stage,
        index: usize,
        stop: CancellationToken,
        kill: CancellationToken,
    ) -> anyhow::Result<BoxFuture<'static, String>> {
        let mut command = Command::new(&self.program);
        command.arg("--store").arg(&self.store_path);
        if let Some(config) = &self.config_path {
            command.arg("--config").arg(config);
        }
        command
            .arg("worker")
            .arg("--stage")
            .arg(stage.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        // Own process group: a terminal Ctrl-C reaches only the coordinator,
        // which forwards it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .with_context(|| format!("spawn {} worker {}", stage, index))?;
        let pid = child.id();
        debug!(stage = %stage, index, pid = ?pid, "Spawned worker process");

        Ok(Box::pin(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = stop.cancelled() => {
                    interrupt(pid);
                    tokio::select! {
                        status = child.wait() => status,
                        _ = kill.cancelled() => {
                            if let Err(e) = child.start_kill() {
                                warn!(stage = %stage, index, "Kill failed: {}", e);
                            }
                            child.wait().await
                        }
                    }
                }
            };
            match status {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {}", e),
            }
        }))
    }
}

/// Ask a worker process to finish its current item and exit
#[cfg(unix)]
fn interrupt(pid: Option<u32>) {
    if let Some(pid) = pid {
        // SAFETY: plain signal delivery to a child we own
        let result = unsafe { libc::kill(pid as i32, libc::SIGINT) };
        if result != 0 {
            debug!(pid, "SIGINT delivery failed (worker already gone)");
        }
    }
}

#[cfg(not(unix))]
fn interrupt(_pid: Option<u32>) {}

/// Runs each worker as a task in the current process
pub struct TaskLauncher {
    ctx: PipelineContext,
    capabilities: Capabilities,
}

impl TaskLauncher {
    pub fn new(ctx: PipelineContext, capabilities: Capabilities) -> Self {
        Self { ctx, capabilities }
    }
}

impl WorkerLauncher for TaskLauncher {
    fn launch(
        &self,
        stage: Stage,
        _index: usize,
        stop: CancellationToken,
        kill: CancellationToken,
    ) -> anyhow::Result<BoxFuture<'static, String>> {
        let handler = stages::handler_for(stage, &self.capabilities);
        let worker = StageWorker::new(self.ctx.clone(), handler);
        let mut task = tokio::spawn(async move { worker.run(stop).await });

        Ok(Box::pin(async move {
            let result = tokio::select! {
                result = &mut task => result,
                _ = kill.cancelled() => {
                    task.abort();
                    task.await
                }
            };
            match result {
                Ok(Ok(())) => "exited".to_string(),
                Ok(Err(e)) => format!("failed: {:#}", e),
                Err(e) if e.is_cancelled() => "killed".to_string(),
                Err(e) => format!("panicked: {}", e),
            }
        }))
    }
}

/// Every worker of every stage
pub struct WorkerPools {
    exits: mpsc::UnboundedReceiver<WorkerExit>,
    monitors: Vec<JoinHandle<()>>,
    stop: CancellationToken,
    kill: CancellationToken,
}

impl WorkerPools {
    /// Launch `sizes.size_for(stage)` workers for every stage
    pub fn spawn(launcher: &dyn WorkerLauncher, sizes: &WorkerPoolConfig) -> anyhow::Result<Self> {
        let (tx, exits) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let kill = CancellationToken::new();
        let mut monitors = Vec::new();

        for stage in Stage::ALL {
            let size = sizes.size_for(stage);
            for index in 0..size {
                let worker = match launcher.launch(stage, index, stop.clone(), kill.clone()) {
                    Ok(worker) => worker,
                    Err(e) => {
                        stop.cancel();
                        kill.cancel();
                        return Err(e);
                    }
                };

                let tx = tx.clone();
                let stop = stop.clone();
                monitors.push(tokio::spawn(async move {
                    let detail = worker.await;
                    let requested = stop.is_cancelled();
                    if requested {
                        debug!(stage = %stage, index, "Worker exited: {}", detail);
                    } else {
                        error!(stage = %stage, index, "Worker exited unexpectedly: {}", detail);
                    }
                    // Receiver gone means the pools are shutting down
                    let _ = tx.send(WorkerExit {
                        stage,
                        index,
                        detail,
                        requested,
                    });
                }));
            }
            info!(stage = %stage, workers = size, "Started worker pool");
        }

        Ok(Self {
            exits,
            monitors,
            stop,
            kill,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.monitors.len()
    }

    /// Next worker exit (pending forever once every worker has been reported)
    pub async fn next_exit(&mut self) -> Option<WorkerExit> {
        self.exits.recv().await
    }

    /// Stop every worker, waiting up to `grace` before killing stragglers
    pub async fn shutdown(self, grace: Duration) {
        info!(workers = self.monitors.len(), "Stopping workers");
        self.stop.cancel();

        let mut monitors = Box::pin(join_all(self.monitors));
        if tokio::time::timeout(grace, monitors.as_mut()).await.is_ok() {
            info!("All workers stopped");
            return;
        }

        warn!(grace_ms = grace.as_millis() as u64, "Workers still running after grace period, killing");
        self.kill.cancel();
        if tokio::time::timeout(KILL_WAIT, monitors).await.is_err() {
            error!("Workers did not exit after kill");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Workers that exit on stop, or ignore stop until killed
    struct FakeLauncher {
        launched: Arc<AtomicUsize>,
        stubborn: bool,
    }

    impl WorkerLauncher for FakeLauncher {
        fn launch(
            &self,
            _stage: Stage,
            _index: usize,
            stop: CancellationToken,
            kill: CancellationToken,
        ) -> anyhow::Result<BoxFuture<'static, String>> {
            self.launched.fetch_add(1, Ordering::SeqCst);
            let stubborn = self.stubborn;
            Ok(Box::pin(async move {
                if stubborn {
                    kill.cancelled().await;
                    "killed".to_string()
                } else {
                    stop.cancelled().await;
                    "exited".to_string()
                }
            }))
        }
    }

    #[tokio::test]
    async fn test_pool_sizes_per_stage() {
        let launched = Arc::new(AtomicUsize::new(0));
        let launcher = FakeLauncher {
            launched: launched.clone(),
            stubborn: false,
        };
        let pools = WorkerPools::spawn(&launcher, &WorkerPoolConfig::default()).unwrap();

        let expected: usize = Stage::ALL
            .iter()
            .map(|s| WorkerPoolConfig::default().size_for(*s))
            .sum();
        assert_eq!(launched.load(Ordering::SeqCst), expected);
        assert_eq!(pools.worker_count(), expected);

        pools.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_stop_requested_exits_are_flagged() {
        let launcher = FakeLauncher {
            launched: Arc::new(AtomicUsize::new(0)),
            stubborn: false,
        };
        let mut pools = WorkerPools::spawn(&launcher, &WorkerPoolConfig::uniform(1)).unwrap();
        pools.stop.cancel();

        let exit = pools.next_exit().await.unwrap();
        assert!(exit.requested);
        assert_eq!(exit.detail, "exited");
    }

    #[tokio::test]
    async fn test_stubborn_workers_are_killed_after_grace() {
        let launcher = FakeLauncher {
            launched: Arc::new(AtomicUsize::new(0)),
            stubborn: true,
        };
        let pools = WorkerPools::spawn(&launcher, &WorkerPoolConfig::uniform(1)).unwrap();

        let started = std::time::Instant::now();
        pools.shutdown(Duration::from_millis(50)).await;
        assert!(started.elapsed() < KILL_WAIT);
    }
}
