//! polycity command-line entry point
//!
//! - `convert`: start a new job and supervise it to completion
//! - `resume`: pick up every registered, unfinished job
//! - `worker`: one stage worker process (launched by the coordinator)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use polycity::capabilities::epsg::EpsgClient;
use polycity::capabilities::Capabilities;
use polycity::config::JobRequest;
use polycity::coordinator::{prepare_job, Coordinator, RunSummary};
use polycity::pipeline::{ProcessLauncher, StageWorker, TaskLauncher, WorkerLauncher};
use polycity::{stages, PipelineContext};
use polycity_common::config::{self as common_config, TomlConfig, ENV_CONFIG_PATH, ENV_STORE_PATH};
use polycity_common::models::Stage;
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "polycity")]
#[command(about = "Convert CityGML buildings into per-building 3D models and a GeoJSON index")]
#[command(version)]
struct Cli {
    /// Coordination store (SQLite file) shared with worker processes
    #[arg(long, global = true, env = ENV_STORE_PATH)]
    store: Option<PathBuf>,

    /// Configuration file (polycity.toml)
    #[arg(long, global = true, env = ENV_CONFIG_PATH)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new conversion job
    Convert(ConvertArgs),

    /// Resume every unfinished job in the store
    Resume {
        /// Run workers as tasks of this process
        #[arg(long)]
        in_process: bool,
    },

    /// Run a single stage worker (used by the coordinator)
    Worker {
        #[arg(long)]
        stage: Stage,
    },
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// CityGML input document
    input: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Source coordinate system code, e.g. EPSG:25832
    #[arg(short = 'c', long = "crs", required_unless_present = "proj4")]
    crs: Option<String>,

    /// Source coordinate system as a proj4 definition
    #[arg(long)]
    proj4: Option<String>,

    /// Prefix for every building identifier
    #[arg(short, long)]
    prefix: Option<String>,

    /// Elevation service endpoint
    #[arg(short = 'e', long)]
    elevation_endpoint: Option<String>,

    /// Elevation service API key
    #[arg(short = 'E', long)]
    elevation_key: Option<String>,

    /// Gazetteer endpoint; enables the place-lookup stage
    #[arg(short = 'w', long)]
    places_endpoint: Option<String>,

    /// Gazetteer API key
    #[arg(short = 'W', long)]
    places_key: Option<String>,

    /// Attribution text stored with every model
    #[arg(short = 'a', long)]
    attribution: Option<String>,

    /// License text stored with every model
    #[arg(short = 'l', long)]
    license: Option<String>,

    /// Run workers as tasks of this process
    #[arg(long)]
    in_process: bool,
}

impl From<ConvertArgs> for JobRequest {
    fn from(args: ConvertArgs) -> Self {
        JobRequest {
            input_path: args.input,
            output_path: args.output,
            crs_code: args.crs,
            proj4: args.proj4,
            prefix: args.prefix,
            elevation_endpoint: args.elevation_endpoint,
            elevation_key: args.elevation_key,
            places_endpoint: args.places_endpoint,
            places_key: args.places_key,
            attribution: args.attribution,
            license: args.license,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Read before the subscriber exists: the file may set the default filter
    let toml_config = common_config::load_toml_config(cli.config.as_deref());
    let filter = toml_config
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| common_config::LoggingConfig::default().filter);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let toml_config = toml_config.context("Failed to load configuration")?;
    let store_path = common_config::resolve_store_path(cli.store.as_deref(), &toml_config);
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    match cli.command {
        Command::Convert(args) => {
            let in_process = args.in_process;
            run_convert(args.into(), in_process, &store_path, cli.config, &toml_config).await
        }
        Command::Resume { in_process } => {
            run_resume(in_process, &store_path, cli.config, &toml_config).await
        }
        Command::Worker { stage } => run_worker(stage, &store_path, &toml_config).await,
    }
}

async fn run_convert(
    request: JobRequest,
    in_process: bool,
    store_path: &Path,
    config_path: Option<PathBuf>,
    toml_config: &TomlConfig,
) -> Result<()> {
    let epsg = EpsgClient::new().context("Failed to create epsg.io client")?;
    let job_config = prepare_job(&request, toml_config, &epsg).await?;

    let ctx = open_context(store_path, toml_config).await?;
    let coordinator = Coordinator::new(ctx.clone(), toml_config.workers.clone());
    let launcher = launcher(in_process, &ctx, store_path, config_path, toml_config)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let summary = coordinator
        .start(job_config, launcher.as_ref(), shutdown)
        .await?;
    report(&summary)
}

async fn run_resume(
    in_process: bool,
    store_path: &Path,
    config_path: Option<PathBuf>,
    toml_config: &TomlConfig,
) -> Result<()> {
    let ctx = open_context(store_path, toml_config).await?;
    let coordinator = Coordinator::new(ctx.clone(), toml_config.workers.clone());
    let launcher = launcher(in_process, &ctx, store_path, config_path, toml_config)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let summary = coordinator.resume(launcher.as_ref(), shutdown).await?;
    report(&summary)
}

async fn run_worker(stage: Stage, store_path: &Path, toml_config: &TomlConfig) -> Result<()> {
    let ctx = open_context(store_path, toml_config).await?;
    let capabilities =
        Capabilities::from_config(toml_config).context("Failed to initialize capabilities")?;
    let worker = StageWorker::new(ctx, stages::handler_for(stage, &capabilities));

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    worker.run(shutdown).await
}

async fn open_context(store_path: &Path, toml_config: &TomlConfig) -> Result<PipelineContext> {
    PipelineContext::open_sqlite(store_path, toml_config.timing.clone())
        .await
        .with_context(|| format!("Failed to open coordination store {}", store_path.display()))
}

fn launcher(
    in_process: bool,
    ctx: &PipelineContext,
    store_path: &Path,
    config_path: Option<PathBuf>,
    toml_config: &TomlConfig,
) -> Result<Box<dyn WorkerLauncher>> {
    if in_process {
        let capabilities =
            Capabilities::from_config(toml_config).context("Failed to initialize capabilities")?;
        Ok(Box::new(TaskLauncher::new(ctx.clone(), capabilities)))
    } else {
        Ok(Box::new(ProcessLauncher::new(
            store_path.to_path_buf(),
            config_path,
        )?))
    }
}

fn report(summary: &RunSummary) -> Result<()> {
    for job_id in &summary.completed {
        info!(job_id = %job_id, "Job finished");
    }
    for job_id in &summary.abandoned {
        error!(job_id = %job_id, "Job abandoned");
    }
    if summary.interrupted {
        info!("Interrupted; run `polycity resume` to continue unfinished jobs");
    }
    if !summary.abandoned.is_empty() {
        anyhow::bail!("{} job(s) abandoned after split failure", summary.abandoned.len());
    }
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
    shutdown.cancel();
}
