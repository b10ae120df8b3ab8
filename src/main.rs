//! Relay Hub Server
//!
//! WebSocket broadcast hub. Every message a client sends is relayed to all
//! connected clients, and each client is told its session id on connect.

mod config;
mod hub;
mod server;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::RelayConfig;
use server::{ServerConfig, WebSocketServer};

/// Relay Hub Server
///
/// WebSocket broadcast hub
#[derive(Parser, Debug)]
#[command(name = "relay-hub")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Path to a TOML relay configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Relay Hub v{}", env!("CARGO_PKG_VERSION"));

    let relay = match &args.config {
        Some(path) => {
            info!("Loading relay configuration from {}", path.display());
            RelayConfig::load(path)?
        }
        None => RelayConfig::default(),
    };
    info!(
        "Max message size {} bytes, keepalive every {:?}",
        relay.max_message_size,
        relay.ping_period()
    );

    // Create server configuration
    let config = ServerConfig::new(args.bind, args.port).with_relay(relay);

    // Create and start the WebSocket server
    let server = Arc::new(WebSocketServer::new(config));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
