mod summary;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

use sitrep_core::remote::GameServerRemote;
use sitrep_core::watcher::run_to_end;
use sitrep_core::{AppConfigExt, CoreContext, MemoryStore, ServerId, ServerSession, StatsService};
use sitrep_types::AppConfig;

#[derive(Parser)]
#[command(name = "sitrep", version, about = "Game server log ingestion and stats")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tail every enabled server's log until interrupted
    Run,
    /// Replay one log file offline and print a summary
    Parse {
        #[arg(short, long)]
        path: PathBuf,
        /// Server id the records are filed under
        #[arg(short, long, default_value = "offline")]
        server: String,
    },
}

/// Stderr always; a daily rolling file too when a log directory is configured.
fn init_logging(log_directory: Option<&Path>) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::builder()
            .with_default_directive(tracing::Level::INFO.into())
            .from_env_lossy()
    };
    let stderr = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let Some(dir) = log_directory else {
        tracing_subscriber::registry().with(stderr).init();
        return None;
    };

    let appender = tracing_appender::rolling::daily(dir, "sitrep.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter());
    tracing_subscriber::registry().with(stderr).with(file).init();
    Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    let _guard = init_logging(config.log_directory.as_deref());

    match cli.command {
        Command::Run => run(config).await,
        Command::Parse { path, server } => parse(&config, &path, ServerId::new(server)).await,
    }
}

async fn load_store(config: &AppConfig) -> Result<Arc<MemoryStore>> {
    let store = match &config.database_path {
        Some(path) => MemoryStore::load(path)
            .await
            .with_context(|| format!("loading store snapshot {}", path.display()))?,
        None => MemoryStore::new(),
    };
    Ok(Arc::new(store))
}

async fn save_store(store: &MemoryStore, config: &AppConfig) {
    let Some(path) = &config.database_path else {
        return;
    };
    match store.save(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Store snapshot saved"),
        Err(e) => tracing::warn!(error = %e, "Failed to save store snapshot"),
    }
}

async fn run(config: AppConfig) -> Result<()> {
    if config.enabled_servers().next().is_none() {
        tracing::warn!("No enabled servers configured; nothing to watch");
    }

    let store = load_store(&config).await?;
    let remote = Arc::new(GameServerRemote::from_config(&config.servers));
    let ctx = CoreContext::new(&config, store.clone(), remote);
    let handle = StatsService::start(&config, ctx);

    let mut snapshots = tokio::time::interval(config.snapshot_interval());
    snapshots.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for ctrl-c")?;
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = snapshots.tick() => save_store(&store, &config).await,
        }
    }

    let metrics = handle.context().metrics.snapshot();
    handle.shutdown().await;
    save_store(&store, &config).await;
    tracing::info!(?metrics, "Final counters");
    Ok(())
}

async fn parse(config: &AppConfig, path: &Path, server: ServerId) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let ctx = CoreContext::new(config, store.clone(), Arc::new(GameServerRemote::new()));
    let mut session = ServerSession::offline(server.clone(), &ctx);

    let started = std::time::Instant::now();
    let lines = run_to_end(&mut session, path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    tracing::info!(
        lines,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Parsed {}",
        path.display()
    );

    print!("{}", summary::render(&store, &server, &ctx.metrics.snapshot()));
    Ok(())
}
