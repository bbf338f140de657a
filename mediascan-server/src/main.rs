use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use mediascan_config::{Config, ConfigLoad, ConfigLoader, ConfigSource};
use mediascan_core::scan::run_indexer;
use mediascan_core::{
    MemoryRecordStore, PostgresRecordStore, ReconciliationSweeper, RecordStore, ScanContext,
    ScanPipeline, WatchDog,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod telemetry;

use telemetry::LogFormat;

/// How long the indexer gets to drain after a shutdown signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "mediascan")]
#[command(about = "Watches a media tree and keeps its metadata index in sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Configuration file (TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment file loaded before reading configuration
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "MEDIASCAN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch and index until interrupted (default)
    Run,
    /// Run one reconciliation sweep and exit
    Sweep,
    /// Load and validate configuration, print the effective settings and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.global.log_format);

    let config = load_config(&cli.global)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Sweep => sweep(config).await,
        Command::CheckConfig => {
            println!("{}", config.to_toml().context("failed to render configuration")?);
            Ok(())
        }
    }
}

fn load_config(args: &GlobalArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }

    let ConfigLoad { config, warnings } = loader.load().context("failed to load configuration")?;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    match &config.metadata.source {
        ConfigSource::File(path) | ConfigSource::EnvPath(path) => {
            info!(path = %path.display(), "configuration loaded from file")
        }
        ConfigSource::EnvInline => info!("configuration loaded from inline environment json"),
        ConfigSource::Default => {}
    }
    warnings.log();

    let scanner = &config.scan.scanner;
    info!(
        paths = ?scanner.paths,
        media_root = %scanner.media_root().display(),
        stability_threshold_ms = scanner.stability_threshold_ms,
        poll_interval_ms = scanner.poll_interval_ms,
        watchdog = config.scan.watchdog.enabled,
        "scanner configuration in effect"
    );
    Ok(config)
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn RecordStore>> {
    let Some(url) = &config.database.url else {
        warn!("No database configured, using in-memory record store");
        return Ok(Arc::new(MemoryRecordStore::new()));
    };

    let store = PostgresRecordStore::connect(url, config.database.max_connections)
        .await
        .with_context(|| {
            format!(
                "failed to connect to PostgreSQL at {}",
                config.database.redacted_url().unwrap_or_default()
            )
        })?;
    store
        .initialize_schema()
        .await
        .context("database migration failed")?;
    info!("Connected to PostgreSQL record store");
    Ok(Arc::new(store))
}

async fn sweep(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let ctx = ScanContext::new(config.scan, store);
    let report = ReconciliationSweeper::from_context(&ctx)
        .sweep()
        .await
        .context("sweep failed")?;
    println!(
        "{}",
        serde_json::json!({ "scanned": report.scanned, "deleted": report.deleted })
    );
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let ctx = ScanContext::new(config.scan, store);
    let shutdown = CancellationToken::new();

    let mut indexer = {
        let ctx = ctx.clone();
        let pipeline = ScanPipeline::with_tools(ctx.clone());
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_indexer(&ctx, &pipeline, shutdown).await })
    };
    let sweeper = spawn_periodic_sweep(&ctx, shutdown.clone());
    let watchdog = spawn_watchdog(&ctx, shutdown.clone());

    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut indexer => {
            shutdown.cancel();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err).context("indexer stopped"),
                Err(err) => Err(err).context("indexer task panicked"),
            };
        }
    }

    shutdown.cancel();
    if tokio::time::timeout(SHUTDOWN_DRAIN, indexer).await.is_err() {
        warn!("Indexer did not stop in time");
    }
    watchdog.abort();
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Shutdown complete");
    Ok(())
}

fn spawn_periodic_sweep(ctx: &ScanContext, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
    let interval = ctx.options.scanner.sweep_interval()?;
    let sweeper = ReconciliationSweeper::from_context(ctx);
    Some(tokio::spawn(async move {
        sweeper.run_periodic(interval, shutdown).await
    }))
}

/// A fatal probe terminates the process after the grace delay so the
/// supervisor can restart it.
fn spawn_watchdog(ctx: &ScanContext, shutdown: CancellationToken) -> JoinHandle<()> {
    let watchdog = WatchDog::from_context(ctx);
    let grace = ctx.options.watchdog.grace();
    tokio::spawn(async move {
        if let Err(err) = watchdog.run(shutdown).await {
            error!(error = %err, grace_ms = grace.as_millis() as u64, "Exiting after watchdog failure");
            tokio::time::sleep(grace).await;
            std::process::exit(1);
        }
    })
}

/// Wait for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
