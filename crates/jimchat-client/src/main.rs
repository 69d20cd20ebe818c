//! jimchat client binary.
//!
//! Usage:
//!
//!   jimchat-client -a <address> -p <port> -u <username> [--password <pw>]
//!
//! Connects to a jimchat server (retrying every second until it
//! appears), establishes a session, and enters an interactive REPL.

mod client;
mod input;

use std::net::IpAddr;

use clap::Parser;

use jimchat_types::config::{ClientConfig, DEFAULT_PORT};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// jimchat - JSON instant messaging client.
#[derive(Parser)]
#[command(name = "jimchat-client", version, about)]
struct Cli {
    /// IP address of the server.
    #[arg(short = 'a', long = "address", default_value = "127.0.0.1")]
    address: IpAddr,

    /// Server TCP port.
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Account name to identify as.
    #[arg(short = 'u', long = "username")]
    username: String,

    /// Password; when set, the handshake uses `authenticate` instead
    /// of `presence`.
    #[arg(long = "password")]
    password: Option<String>,

    /// Status text carried in the presence handshake.
    #[arg(long = "status", default_value = "")]
    status: String,
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

    let config = ClientConfig {
        server_addr: cli.address,
        port: cli.port,
        username: cli.username,
        password: cli.password,
        status: cli.status,
        ..ClientConfig::default()
    };

    if let Err(e) = config.validate() {
        tracing::error!(%e, "invalid configuration");
        std::process::exit(1);
    }

    if let Err(e) = client::run(config).await {
        tracing::error!(%e, "client error");
        std::process::exit(1);
    }
}
