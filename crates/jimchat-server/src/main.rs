//! jimchat server binary.
//!
//! Usage:
//!
//!   jimchat-server -a <address> -p <port> [--data-dir <path>]
//!
//! The server runs until interrupted with Ctrl+C; the pending message
//! queue is persisted on the way out and reloaded on the next start.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;

use jimchat_protocol::WireCodec;
use jimchat_server::{bind_listener, Dispatcher};
use jimchat_storage::{JsonDirectory, PendingStore};
use jimchat_types::config::{ServerConfig, DEFAULT_PORT};
use jimchat_types::Result;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const PENDING_FILE: &str = "pending.json";
const DIRECTORY_FILE: &str = "directory.json";

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// jimchat - JSON instant messaging server.
#[derive(Parser)]
#[command(name = "jimchat-server", version, about)]
struct Cli {
    /// IP address for the server listener.
    #[arg(short = 'a', long = "address", default_value = "0.0.0.0")]
    address: IpAddr,

    /// Port for the server listener.
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory holding the pending queue and the user directory.
    #[arg(long = "data-dir", default_value = "jimchat-data")]
    data_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = ServerConfig {
        address: cli.address,
        port: cli.port,
        data_dir: cli.data_dir,
        ..ServerConfig::default()
    };

    if let Err(e) = config.validate() {
        tracing::error!(%e, "invalid configuration");
        std::process::exit(1);
    }

    if let Err(e) = run_server(config).await {
        tracing::error!(%e, "server error");
        std::process::exit(1);
    }
}

async fn run_server(config: ServerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir).map_err(|e| {
        jimchat_types::JimError::StorageError {
            reason: format!("failed to create data directory: {e}"),
        }
    })?;
    tracing::info!(data_dir = %config.data_dir.display(), "data directory ready");

    let pending = PendingStore::open(&config.data_dir.join(PENDING_FILE))?;
    tracing::info!(queued = pending.total_len()?, "pending queue loaded");

    let directory = JsonDirectory::open(&config.data_dir.join(DIRECTORY_FILE))?;

    let dispatcher = Dispatcher::new(
        WireCodec::new(),
        pending,
        Box::new(directory),
        &config,
    );

    let listener = bind_listener(&config).await?;

    // Ctrl+C triggers the orderly shutdown path (persist + close).
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    dispatcher.run(listener, shutdown_rx).await
}
