//! Coordinator runs with `polycity worker` child processes
//!
//! Workers are the real binary sharing a temporary SQLite store with the
//! test, so these cover signal delivery and lease handling across processes.

mod helpers;

use helpers::*;
use polycity::coordinator::Coordinator;
use polycity::pipeline::accounting::index_path;
use polycity::pipeline::{JobRegistry, ProcessLauncher};
use polycity::PipelineContext;
use polycity_common::config::{TimingConfig, WorkerPoolConfig};
use polycity_common::models::{ServiceEndpoint, Stage};
use serial_test::serial;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const RUN_LIMIT: Duration = Duration::from_secs(60);

fn timing(shutdown_grace_ms: u64) -> TimingConfig {
    TimingConfig {
        poll_interval_ms: 20,
        idle_pull_ms: 20,
        shutdown_grace_ms,
        ..fast_timing()
    }
}

/// Config file read by the workers: no converter formats, no request spacing
fn write_config(dir: &Path, timing: &TimingConfig) -> PathBuf {
    let path = dir.join("polycity.toml");
    let toml = format!(
        r#"[logging]
filter = "polycity=warn"

[elevation]
min_interval_ms = 0

[convert]
formats = []

[timing]
poll_interval_ms = {}
split_settle_ms = {}
shutdown_grace_ms = {}
lease_secs = {}
max_deliveries = {}
idle_pull_ms = {}
"#,
        timing.poll_interval_ms,
        timing.split_settle_ms,
        timing.shutdown_grace_ms,
        timing.lease_secs,
        timing.max_deliveries,
        timing.idle_pull_ms,
    );
    std::fs::write(&path, toml).expect("write config");
    path
}

struct ProcessRun {
    ctx: PipelineContext,
    coordinator: Coordinator,
    launcher: ProcessLauncher,
}

async fn process_run(dir: &Path, timing: TimingConfig) -> ProcessRun {
    let store_path = dir.join("store.db");
    let config_path = write_config(dir, &timing);
    let ctx = PipelineContext::open_sqlite(&store_path, timing)
        .await
        .expect("open store");
    let launcher = ProcessLauncher::with_program(
        PathBuf::from(env!("CARGO_BIN_EXE_polycity")),
        store_path,
        Some(config_path),
    );
    ProcessRun {
        coordinator: Coordinator::new(ctx.clone(), WorkerPoolConfig::uniform(1)),
        ctx,
        launcher,
    }
}

#[tokio::test]
#[serial]
async fn test_worker_processes_run_job_to_completion() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &buildings(3));
    let output = dir.path().join("out");
    // Idle workers ignoring SIGINT would hold shutdown for the whole grace
    let run = process_run(dir.path(), timing(60_000)).await;

    let started = Instant::now();
    let summary = tokio::time::timeout(
        RUN_LIMIT,
        run.coordinator.start(
            job_config(&input, &output),
            &run.launcher,
            CancellationToken::new(),
        ),
    )
    .await
    .expect("run finished")
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(summary.completed.len(), 1);
    assert!(summary.abandoned.is_empty());
    assert!(!summary.interrupted);

    let index = read_json(&index_path(&output));
    assert_eq!(feature_ids(&index), vec!["B0", "B1", "B2"]);

    let registry = JobRegistry::new(run.ctx.store.clone());
    assert!(registry.active_ids().await.unwrap().is_empty());
    for stage in Stage::ALL {
        assert_eq!(run.ctx.queue.len(stage).await.unwrap(), 0, "{} queue", stage);
    }
}

#[tokio::test]
#[serial]
async fn test_stopped_workers_leave_item_recoverable() {
    let dir = TempDir::new().unwrap();
    // No ground surface: the elevation worker has to ask the service
    let specs = vec![BuildingSpec::new("B0", 0).ground(Ground::Missing)];
    let input = write_input(dir.path(), &specs);
    let output = dir.path().join("out");
    let run = process_run(dir.path(), timing(500)).await;

    // Accepts connections but never answers
    let service = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = job_config(&input, &output);
    config.elevation = Some(ServiceEndpoint {
        url: format!("http://{}", service.local_addr().unwrap()),
        api_key: None,
    });

    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    let stall = tokio::spawn(async move {
        let (socket, _) = service.accept().await.expect("elevation request");
        stop.cancel();
        // Hold the connection open until the worker is gone
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(socket);
    });

    let summary = tokio::time::timeout(
        RUN_LIMIT,
        run.coordinator.start(config, &run.launcher, shutdown),
    )
    .await
    .expect("run finished")
    .unwrap();
    stall.abort();

    assert!(summary.interrupted);
    assert!(summary.completed.is_empty());
    let registry = JobRegistry::new(run.ctx.store.clone());
    let active = registry.active_ids().await.unwrap();
    assert_eq!(active.len(), 1);
    let progress = registry.progress(&active[0]).await.unwrap().unwrap();
    assert_eq!(progress.items_completed + progress.items_failed, 0);

    // The in-flight delivery is still queued and comes back once its lease is released
    for stage in Stage::ALL {
        let expected = if stage == Stage::Elevation { 1 } else { 0 };
        assert_eq!(run.ctx.queue.len(stage).await.unwrap(), expected, "{} queue", stage);
    }
    assert_eq!(run.ctx.queue.recover_abandoned().await.unwrap(), 1);
    let delivery = run
        .ctx
        .queue
        .pull(Stage::Elevation, Duration::from_secs(60))
        .await
        .unwrap()
        .expect("recovered delivery");
    assert_eq!(delivery.decode().unwrap().id, "B0");
}
