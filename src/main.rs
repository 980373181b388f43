use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use kube::api::Api;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fleetplane::config::OrchestratorConfig;
use fleetplane::controller::SystemClock;
use fleetplane::crd::{ShootState, ShootStateSpec};
use fleetplane::pipeline::Pipeline;
use fleetplane::store::KubeStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Print the collected metrics after the command finished
    #[arg(long, global = true)]
    print_metrics: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy every component and wait for it, then delete stale extensions
    Reconcile(RunArgs),
    /// Recreate every component from a ShootState snapshot
    Restore(RestoreArgs),
    /// Hand every component over for migration to another hosting cluster
    Migrate(RunArgs),
    /// Delete every component and wait until it is gone
    Delete(RunArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Orchestrator configuration file (.yaml, .yml or .toml)
    #[arg(long, short, env = "FLEETPLANE_CONFIG")]
    config: PathBuf,

    /// Overrides wait.intervalSeconds of the configuration
    #[arg(long, env = "WAIT_INTERVAL_SECONDS")]
    wait_interval_seconds: Option<u64>,
}

#[derive(Parser, Debug)]
struct RestoreArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Read the snapshot from a ShootState manifest instead of the cluster
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Name of the ShootState object, defaults to the shoot name
    #[arg(long, env = "SHOOT_STATE_NAME")]
    shoot_state: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let result = match args.command {
        Commands::Version => {
            println!("fleetplane v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Reconcile(run) => run_flow(run, Flow::Reconcile).await,
        Commands::Restore(restore) => run_restore(restore).await,
        Commands::Migrate(run) => run_flow(run, Flow::Migrate).await,
        Commands::Delete(run) => run_flow(run, Flow::Delete).await,
    };

    if args.print_metrics {
        print_metrics();
    }
    result
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
    }
}

#[cfg(feature = "metrics")]
fn print_metrics() {
    print!("{}", fleetplane::controller::metrics::encode());
}

#[cfg(not(feature = "metrics"))]
fn print_metrics() {
    warn!("Built without the metrics feature, nothing to print");
}

#[derive(Clone, Copy, Debug)]
enum Flow {
    Reconcile,
    Migrate,
    Delete,
}

fn load_config(args: &RunArgs) -> anyhow::Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if let Some(interval) = args.wait_interval_seconds {
        config.wait.interval_seconds = interval;
        config
            .validate()
            .map_err(|errors| fleetplane::Error::ValidationError(
                fleetplane::crd::validation::join_errors(&errors),
            ))
            .context("applying WAIT_INTERVAL_SECONDS")?;
    }
    Ok(config)
}

async fn build_pipeline(config: &OrchestratorConfig) -> anyhow::Result<Pipeline<KubeStore>> {
    let client = kube::Client::try_default()
        .await
        .context("connecting to the hosting cluster")?;
    Ok(Pipeline::new(
        Arc::new(KubeStore::new(client)),
        Arc::new(SystemClock),
        config,
    ))
}

/// Token cancelled on Ctrl-C so that running waits stop promptly
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

async fn run_flow(args: RunArgs, flow: Flow) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let pipeline = build_pipeline(&config).await?;
    let cancel = shutdown_token();

    info!(namespace = %config.namespace, ?flow, "Starting");
    let started = std::time::Instant::now();
    let result = match flow {
        Flow::Reconcile => pipeline.reconcile(&cancel).await,
        Flow::Migrate => pipeline.migrate(&cancel).await,
        Flow::Delete => pipeline.delete(&cancel).await,
    };
    result.with_context(|| format!("{flow:?} of {} failed", config.namespace))?;

    info!(elapsed = ?started.elapsed(), ?flow, "Done");
    Ok(())
}

async fn run_restore(args: RestoreArgs) -> anyhow::Result<()> {
    let config = load_config(&args.run)?;
    let snapshot = match &args.state_file {
        Some(path) => read_state_file(path)?,
        None => {
            let client = kube::Client::try_default()
                .await
                .context("connecting to the hosting cluster")?;
            let name = args.shoot_state.as_deref().unwrap_or(&config.shoot_name);
            let api: Api<ShootState> = Api::namespaced(client, &config.namespace);
            api.get(name)
                .await
                .with_context(|| format!("reading ShootState {}/{}", config.namespace, name))?
                .spec
        }
    };

    let pipeline = build_pipeline(&config).await?;
    let cancel = shutdown_token();
    info!(
        namespace = %config.namespace,
        states = snapshot.extensions.len(),
        "Starting restore"
    );
    pipeline
        .restore(&cancel, &snapshot)
        .await
        .with_context(|| format!("Restore of {} failed", config.namespace))?;
    info!("Done");
    Ok(())
}

fn read_state_file(path: &std::path::Path) -> anyhow::Result<ShootStateSpec> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let state: ShootState = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing ShootState from {}", path.display()))?;
    Ok(state.spec)
}
