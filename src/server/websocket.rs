//! WebSocket server implementation
//!
//! Listens on a configurable address, upgrades each connection to a
//! WebSocket, assigns it an id and hands it to a session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::hub::{Hub, HubHandle, IdAllocator};
use crate::session::{run_session, SessionConfig};

/// Errors raised while serving connections
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,
}

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Hub and session tuning
    pub relay: RelayConfig,
}

impl ServerConfig {
    /// Create a new server configuration with default relay settings
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            relay: RelayConfig::default(),
        }
    }

    /// Set the relay configuration
    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// WebSocket server feeding the broadcast hub
pub struct WebSocketServer {
    config: ServerConfig,
    hub: HubHandle,
    ids: Arc<IdAllocator>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server and start its hub
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let (hub, handle) = Hub::from_config(&config.relay);
        hub.spawn();

        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            hub: handle,
            ids: Arc::new(IdAllocator::new()),
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown
    ///
    /// Each connection runs on its own task; a failed accept or handshake is
    /// logged and never stops the loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        match listener.local_addr() {
            Ok(addr) => info!("WebSocket server listening on ws://{}", addr),
            Err(e) => warn!("WebSocket server listening on unknown address: {}", e),
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let hub = self.hub.clone();
                            let ids = Arc::clone(&self.ids);
                            let relay = self.config.relay.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, hub, ids, relay, shutdown_rx).await {
                                    warn!("Connection from {} abandoned: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        self.wait_for_sessions().await;
        Ok(())
    }

    /// Wait up to the write deadline for sessions to close their transports
    async fn wait_for_sessions(&self) {
        let deadline = Instant::now() + self.config.relay.write_timeout();
        let mut announced = false;

        while let Ok(participants) = self.hub.participants().await {
            if participants.is_empty() || Instant::now() >= deadline {
                break;
            }
            if !announced {
                info!("Waiting for {} active sessions to close...", participants.len());
                announced = true;
            }
            sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Transport limits applied to every upgraded connection
fn websocket_config(relay: &RelayConfig) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(relay.max_message_size);
    config.max_frame_size = Some(relay.max_message_size);
    config
}

/// Upgrade a single connection and run its session
///
/// An id is only assigned once the handshake has succeeded.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: HubHandle,
    ids: Arc<IdAllocator>,
    relay: RelayConfig,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    debug!("New connection from {}", peer_addr);

    let handshake = accept_async_with_config(stream, Some(websocket_config(&relay)));
    let ws_stream = timeout(relay.write_timeout(), handshake)
        .await
        .map_err(|_| ServerError::HandshakeTimeout)??;

    let id = ids.assign_next();
    info!("Connection from {} assigned session {}", peer_addr, id);

    let (sink, stream) = ws_stream.split();
    run_session(
        id,
        stream,
        sink,
        hub,
        SessionConfig::from(&relay),
        shutdown_rx,
    )
    .await;

    Ok(())
}
