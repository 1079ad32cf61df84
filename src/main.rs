use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use floodgate::config::{FloodgateConfig, LogFormat, StoreBackend, StoreConfig};
use floodgate::http::HttpServer;
use floodgate::ratelimit::{Identifier, OverrideRecord, RateLimiter};
use floodgate::store::{CounterStore, MemoryStore, RedisStore};

/// Fixed-window rate limiting backed by a shared Redis store.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
struct Cli {
    /// Configuration file; environment variables prefixed FLOODGATE__ override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the rate limited HTTP service (default)
    Serve,
    /// Manage per-identifier override records
    #[command(subcommand)]
    Override(OverrideCommand),
}

#[derive(Debug, Subcommand)]
enum OverrideCommand {
    /// Create an override record; an existing record is left untouched
    Set(SetOverride),
    /// Print the override record for an identifier as JSON
    Show { identifier: String },
    /// Delete the override record for an identifier
    Remove { identifier: String },
}

#[derive(Debug, Args)]
struct SetOverride {
    /// Credential token or network address
    identifier: String,
    /// Requests allowed per one-second window
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    limit: u64,
    /// Block duration in seconds once the limit is exceeded
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    cooldown: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = FloodgateConfig::load(cli.config.as_deref())?;

    // The log format lives in the configuration, so tracing starts after it loads
    init_tracing(config.logging.format);
    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Loaded configuration file");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Override(command) => manage_override(&config.store, command).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn connect_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    let store: Arc<dyn CounterStore> = match config.backend {
        StoreBackend::Redis => Arc::new(RedisStore::connect(config).await?),
        StoreBackend::Memory => {
            info!("Using in-process counter store; counts are not shared between instances");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

async fn serve(config: FloodgateConfig) -> anyhow::Result<()> {
    info!("Starting Floodgate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        default_limit = config.rate_limiting.default_limit,
        default_cooldown_secs = config.rate_limiting.default_cooldown_secs,
        backend = ?config.store.backend,
        "Configuration loaded"
    );

    let store = connect_store(&config.store).await?;
    let rate_limiter = Arc::new(RateLimiter::from_config(store, &config.rate_limiting));
    info!("Rate limiter initialized");

    let server = HttpServer::new(config.server.listen_addr, rate_limiter);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Floodgate Rate Limiting Service stopped");
    Ok(())
}

/// Override records only matter in a store the serving instances share.
fn require_shared_store(config: &StoreConfig) -> anyhow::Result<()> {
    if config.backend == StoreBackend::Memory {
        anyhow::bail!(
            "override commands need a shared store; with store.backend = \"memory\" \
             the record would be discarded when this command exits"
        );
    }
    Ok(())
}

async fn manage_override(config: &StoreConfig, command: OverrideCommand) -> anyhow::Result<()> {
    require_shared_store(config)?;
    let store = connect_store(config).await?;

    match command {
        OverrideCommand::Set(args) => {
            let key = Identifier::new(args.identifier).override_key();
            let record = OverrideRecord::new(args.limit, Duration::from_secs(args.cooldown));
            if store.upsert_override(&key, &record).await? {
                println!("created {}", key);
            } else {
                println!("{} already exists; left unchanged", key);
            }
        }
        OverrideCommand::Show { identifier } => {
            let key = Identifier::new(identifier).override_key();
            match store.read_override(&key).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("no override record at {}", key),
            }
        }
        OverrideCommand::Remove { identifier } => {
            let key = Identifier::new(identifier).override_key();
            store.delete(&key).await?;
            println!("removed {}", key);
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
