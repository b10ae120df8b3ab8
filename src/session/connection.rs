//! Session supervisor
//!
//! Registers a connection with the hub, runs its inbound and outbound loops
//! as two tasks, and makes sure neither outlives the other.

use std::fmt;
use std::time::Duration;

use futures_util::{Sink, Stream};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{inbound_loop, outbound_loop};
use crate::config::RelayConfig;
use crate::hub::{HubHandle, SessionHandle, SessionId};

/// Errors that end a session loop
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport read failed: {0}")]
    Read(String),

    #[error("No frame received within {0:?}")]
    ReadTimeout(Duration),

    #[error("Transport write failed: {0}")]
    Write(String),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("Hub is not running")]
    HubClosed,
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Per-session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound of the outbound queue
    pub outbound_capacity: usize,
    /// Deadline for each inbound frame
    pub read_timeout: Duration,
    /// Keepalive period
    pub ping_period: Duration,
    /// Deadline for each outbound frame
    pub write_timeout: Duration,
}

impl From<&RelayConfig> for SessionConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            outbound_capacity: config.outbound_capacity,
            read_timeout: config.pong_wait(),
            ping_period: config.ping_period(),
            write_timeout: config.write_timeout(),
        }
    }
}

/// Run one session to completion
///
/// Returns once both loops have stopped and the session has been removed from
/// the hub. A shutdown signal tears the session down like a transport failure.
pub async fn run_session<S, E, K>(
    id: SessionId,
    stream: S,
    sink: K,
    hub: HubHandle,
    config: SessionConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
    K: Sink<Message> + Unpin + Send + 'static,
    K::Error: fmt::Display + Send,
{
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
    if hub
        .register(SessionHandle::new(id, outbound_tx))
        .await
        .is_err()
    {
        warn!("Hub is not running, dropping session {}", id);
        return;
    }

    let grace = config.write_timeout;
    let mut recv_task = tokio::spawn(inbound_loop(
        id,
        stream,
        hub.clone(),
        config.read_timeout,
    ));
    let mut send_task = tokio::spawn(outbound_loop(
        id,
        sink,
        outbound_rx,
        hub.clone(),
        config,
    ));

    tokio::select! {
        result = &mut recv_task => {
            log_exit(id, "inbound", result);
            // The inbound loop unregistered, which closes the queue
            finish_outbound(id, send_task, grace).await;
        }
        result = &mut send_task => {
            log_exit(id, "outbound", result);
            recv_task.abort();
        }
        Ok(()) = shutdown_rx.recv() => {
            info!("Shutdown signal received, closing session {}", id);
            recv_task.abort();
            let _ = hub.unregister(id).await;
            finish_outbound(id, send_task, grace).await;
        }
    }

    // Repeat unregistration is a no-op in the hub
    let _ = hub.unregister(id).await;
    info!("Session {} closed", id);
}

/// Give the outbound loop `grace` to drain and close the transport
async fn finish_outbound(
    id: SessionId,
    mut send_task: JoinHandle<SessionResult<()>>,
    grace: Duration,
) {
    match timeout(grace, &mut send_task).await {
        Ok(result) => log_exit(id, "outbound", result),
        Err(_) => {
            debug!("Session {} outbound loop did not drain in time", id);
            send_task.abort();
        }
    }
}

fn log_exit(id: SessionId, direction: &str, result: Result<SessionResult<()>, JoinError>) {
    match result {
        Ok(Ok(())) => debug!("Session {} {} loop finished", id, direction),
        Ok(Err(e)) => info!("Session {} {} loop ended: {}", id, direction, e),
        Err(e) if e.is_cancelled() => debug!("Session {} {} loop cancelled", id, direction),
        Err(e) => warn!("Session {} {} task failed: {}", id, direction, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use futures::channel::mpsc as frames;
    use futures_util::StreamExt;

    fn id(value: u64) -> SessionId {
        SessionId::new(value)
    }

    fn config() -> SessionConfig {
        SessionConfig {
            outbound_capacity: 8,
            read_timeout: Duration::from_secs(5),
            ping_period: Duration::from_secs(60),
            write_timeout: Duration::from_secs(1),
        }
    }

    /// In-memory peer: what the test sends in, and what the session wrote out
    struct Peer {
        inbound: frames::UnboundedSender<Result<Message, String>>,
        outbound: frames::UnboundedReceiver<Message>,
        task: JoinHandle<()>,
    }

    fn connect(value: u64, hub: &HubHandle, shutdown: &broadcast::Sender<()>) -> Peer {
        let (inbound, stream) = frames::unbounded();
        let (sink, outbound) = frames::unbounded();
        let task = tokio::spawn(run_session(
            id(value),
            stream,
            sink,
            hub.clone(),
            config(),
            shutdown.subscribe(),
        ));
        Peer {
            inbound,
            outbound,
            task,
        }
    }

    #[tokio::test]
    async fn test_peer_close_tears_down_both_loops() {
        let (hub, handle) = Hub::new(16, true);
        hub.spawn();
        let (shutdown, _) = broadcast::channel(1);

        let mut peer = connect(0, &handle, &shutdown);
        assert_eq!(
            peer.outbound.next().await,
            Some(Message::Binary(b"PlayerID_0_0".to_vec()))
        );

        peer.inbound
            .unbounded_send(Ok(Message::Close(None)))
            .unwrap();
        peer.task.await.unwrap();

        // Outbound side closed the transport
        assert_eq!(peer.outbound.next().await, None);
        assert!(handle.participants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relay_between_sessions() {
        let (hub, handle) = Hub::new(16, true);
        hub.spawn();
        let (shutdown, _) = broadcast::channel(1);

        let mut a = connect(0, &handle, &shutdown);
        assert_eq!(
            a.outbound.next().await,
            Some(Message::Binary(b"PlayerID_0_0".to_vec()))
        );
        let mut b = connect(1, &handle, &shutdown);
        assert_eq!(
            b.outbound.next().await,
            Some(Message::Binary(b"PlayerID_1_0_1".to_vec()))
        );

        a.inbound
            .unbounded_send(Ok(Message::Text("hello\nworld".to_string())))
            .unwrap();

        let expected = Some(Message::Binary(b"hello world".to_vec()));
        assert_eq!(b.outbound.next().await, expected);
        assert_eq!(a.outbound.next().await, expected);
    }

    #[tokio::test]
    async fn test_write_failure_stops_inbound_loop() {
        let (hub, handle) = Hub::new(16, true);
        hub.spawn();
        let (shutdown, _) = broadcast::channel(1);

        let peer = connect(0, &handle, &shutdown);
        let Peer {
            inbound: _open_inbound,
            outbound,
            task,
        } = peer;
        drop(outbound);

        // The announcement write fails while the peer never closes its side,
        // so only the outbound failure can end the session
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.participants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_signal_closes_session() {
        let (hub, handle) = Hub::new(16, true);
        hub.spawn();
        let (shutdown, _) = broadcast::channel(1);

        let mut peer = connect(0, &handle, &shutdown);
        assert!(peer.outbound.next().await.is_some());

        shutdown.send(()).unwrap();
        peer.task.await.unwrap();
        assert_eq!(peer.outbound.next().await, None);
        assert!(handle.participants().await.unwrap().is_empty());
    }
}
