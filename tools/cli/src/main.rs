//! Hyperoffline CLI - Inspect and maintain the offline cache.
//!
//! This tool operates directly on the SQLite store used by the offline
//! engine: it reports queue state, replays queued requests and wipes or
//! extracts cached resources.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hyperoffline_common::{is_offline_only, Method};
use hyperoffline_sync::{
    Connectivity, ConnectivityMonitor, HttpContext, OfflineConfig, OfflineContext, SyncEngine,
};

#[derive(Parser)]
#[command(name = "hyperoffline")]
#[command(about = "Hyperoffline - Offline cache maintenance")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the cache database (default: platform data directory).
    #[arg(long)]
    db: Option<PathBuf>,

    /// JSON configuration file; `--db` takes precedence over its path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue and cache statistics.
    Status,

    /// List queued requests.
    Pending {
        /// Only show queued POSTs to this URL.
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Send all queued requests to the server.
    Replay,

    /// Print offline-only resources as JSON and remove them from the cache.
    Extract,

    /// Discard every cached resource and queued request.
    Reinitialize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config = load_config(cli.config.as_ref(), cli.db)?;
    let engine = Arc::new(
        SyncEngine::open(&config)
            .await
            .context("Failed to open offline cache")?,
    );

    match cli.command {
        Commands::Status => cmd_status(&engine).await,
        Commands::Pending { url } => cmd_pending(&engine, url.as_deref()).await,
        Commands::Replay => cmd_replay(&engine).await,
        Commands::Extract => cmd_extract(engine).await,
        Commands::Reinitialize => cmd_reinitialize(&engine).await,
    }
}

/// Setup logging. `RUST_LOG` overrides the `--verbose` level when set.
fn init_logging(verbose: bool) -> Result<()> {
    let builder = FmtSubscriber::builder().with_target(false).compact();

    match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())?
        }
        Err(_) => {
            let level = if verbose { Level::DEBUG } else { Level::INFO };
            tracing::subscriber::set_global_default(builder.with_max_level(level).finish())?
        }
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>, db: Option<PathBuf>) -> Result<OfflineConfig> {
    let mut config = match path {
        Some(path) => OfflineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => OfflineConfig::default(),
    };

    if let Some(db) = db {
        config.database_path = Some(db);
    }
    if config.database_path.is_none() {
        config.database_path = Some(
            OfflineConfig::default_database_path()
                .context("No data directory available, pass --db")?,
        );
    }
    Ok(config)
}

/// Print queue and cache statistics.
async fn cmd_status(engine: &SyncEngine) -> Result<()> {
    let uris = engine
        .store()
        .entry_uris()
        .await
        .context("Failed to read cache entries")?;
    let offline_only = uris.iter().filter(|uri| is_offline_only(uri)).count();

    println!("Offline cache status:");
    println!("  Store: {}", engine.store().name());
    println!("  Queued requests: {}", engine.offline_requests());
    println!("  Cached resources: {}", uris.len() - offline_only);
    println!("  Offline-only resources: {}", offline_only);

    Ok(())
}

/// List queued requests in replay order.
async fn cmd_pending(engine: &SyncEngine, url: Option<&str>) -> Result<()> {
    let requests = match url {
        Some(url) => engine.offline_posts(url).await,
        None => engine.pending_requests().await,
    }
    .context("Failed to read request queue")?;

    if requests.is_empty() {
        println!("No queued requests.");
        return Ok(());
    }

    for pending in requests {
        let body = match &pending.request.data {
            Some(data) if pending.method() != Method::Delete => serde_json::to_string(data)?,
            _ => String::new(),
        };
        println!(
            "  #{:<5} {:<6} {} {}",
            pending.id,
            pending.method().as_str().to_uppercase(),
            pending.url(),
            body
        );
    }

    Ok(())
}

/// Drain the queue and replay it over HTTP.
async fn cmd_replay(engine: &SyncEngine) -> Result<()> {
    let pending = engine.offline_requests();
    if pending == 0 {
        println!("Nothing to replay.");
        return Ok(());
    }

    info!("Replaying {} queued requests", pending);
    let transport = HttpContext::new();
    let report = engine
        .replay_pending(&transport)
        .await
        .context("Replay stopped")?;

    println!("Replayed {} requests.", report.replayed);
    if report.skipped > 0 {
        println!("Skipped {} requests.", report.skipped);
    }

    Ok(())
}

/// Move offline-only resources out of the cache and print them.
async fn cmd_extract(engine: Arc<SyncEngine>) -> Result<()> {
    let monitor = ConnectivityMonitor::new(Connectivity::Offline);
    let context = OfflineContext::new(Arc::new(HttpContext::new()), engine, monitor.subscribe());

    let extracted = context
        .get_and_clear_offline_resources()
        .await
        .context("Failed to extract offline resources")?;
    let resources = extracted.resources().await;

    println!("{}", serde_json::to_string_pretty(&resources)?);
    info!("Extracted {} offline-only resources", resources.len());

    Ok(())
}

/// Wipe the cache.
async fn cmd_reinitialize(engine: &SyncEngine) -> Result<()> {
    engine
        .reinitialize()
        .await
        .context("Failed to reinitialize offline cache")?;

    println!("Offline cache reinitialized.");
    Ok(())
}
