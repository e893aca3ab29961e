//! Outbox relay binary entry point.
//!
//! Usage: outbox-relay [--config <file>] [--mode auth|profile] [run|stats]

use clap::{Parser, Subcommand};
use outbox_database::{DatabasePool, PoolConfig};
use outbox_relay::{
    FamilyDescriptor, OutboxRelay, RedisStreamPublisher, RelayResult, RelaySettings,
    SqliteOutboxStore,
};
use relay_config_and_utils::{init_logging, RelayConfig, RelayMode};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

const SERVICE_NAME: &str = "outbox-relay";

/// Relays outbox events to Redis Streams.
#[derive(Parser, Debug)]
#[command(name = "outbox-relay", version)]
#[command(about = "Transactional outbox relay for auth and profile events")]
struct Args {
    /// JSON config file.
    #[arg(long, env = "OUTBOX_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Event family to drain (auth or profile).
    #[arg(long)]
    mode: Option<RelayMode>,

    /// Path to the SQLite outbox database.
    #[arg(long)]
    database: Option<PathBuf>,

    /// Redis connection URL.
    #[arg(long)]
    redis_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Relay events until interrupted (default).
    Run,
    /// Print event counts for the selected family and exit.
    Stats,
}

impl Args {
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(ref database) = self.database {
            config.database_path = database.clone();
        }
        if let Some(ref redis_url) = self.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref log_level) = self.log_level {
            config.log_level = log_level.clone();
        }
    }
}

#[derive(Serialize)]
struct StatsReport {
    mode: RelayMode,
    table: &'static str,
    max_attempts: i64,
    pending: u64,
    sent: u64,
    error: u64,
    exhausted: u64,
}

#[tokio::main]
async fn main() -> RelayResult<()> {
    let args = Args::parse();

    let mut config = RelayConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    init_logging(SERVICE_NAME, &config.log_level, config.log_format);

    info!(
        mode = %config.mode,
        enabled = config.enabled,
        database = %config.database_path.display(),
        redis_url = %config.redis_url,
        poll_interval_ms = config.poll_interval_ms,
        batch_size = config.batch_size,
        max_attempts = config.max_attempts,
        retry_delay_ms = config.retry_delay_ms,
        claim_lease_ms = config.claim_lease_ms,
        "Configuration loaded"
    );

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Stats => print_stats(&config),
    }
}

async fn run(config: RelayConfig) -> RelayResult<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    if !config.enabled {
        info!(mode = %config.mode, "Outbox relay disabled, idling until shutdown");
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
        return Ok(());
    }

    let descriptor = FamilyDescriptor::for_mode(config.mode);
    let pool = Arc::new(DatabasePool::open(
        &config.database_path,
        PoolConfig::default(),
    )?);
    pool.health_check()?;
    info!(path = pool.path(), table = descriptor.table.name(), "Outbox database ready");

    let store = SqliteOutboxStore::new(pool, descriptor.table);
    let publisher = RedisStreamPublisher::new(
        &config.redis_url,
        config.publish_timeout(),
        config.stream_max_len,
    )?;

    let relay = Arc::new(OutboxRelay::new(
        store,
        publisher,
        descriptor,
        RelaySettings::from_config(&config),
    ));
    relay.run(shutdown_rx).await;

    Ok(())
}

fn print_stats(config: &RelayConfig) -> RelayResult<()> {
    let descriptor = FamilyDescriptor::for_mode(config.mode);
    let settings = RelaySettings::from_config(config);
    let pool = DatabasePool::open(&config.database_path, PoolConfig::default())?;
    let stats = pool.stats(descriptor.table, settings.max_attempts)?;

    let report = StatsReport {
        mode: config.mode,
        table: descriptor.table.name(),
        max_attempts: settings.max_attempts,
        pending: stats.pending,
        sent: stats.sent,
        error: stats.error,
        exhausted: stats.exhausted,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
