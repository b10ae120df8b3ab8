//! Inbound loop
//!
//! Reads frames from the peer and submits each normalized payload to the hub.
//! Never writes to the transport.

use std::fmt;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::{SessionError, SessionResult};
use crate::hub::{HubHandle, Payload, SessionId};
use crate::server::{inbound_payload, normalize_payload};

/// Run the inbound loop until the peer goes away, then unregister
///
/// Every frame, control frames included, must arrive within `read_timeout` of
/// the previous one. Returns `Ok` when the peer closed the connection.
pub async fn inbound_loop<S, E>(
    id: SessionId,
    mut stream: S,
    hub: HubHandle,
    read_timeout: Duration,
) -> SessionResult<()>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let result = read_until_closed(id, &mut stream, &hub, read_timeout).await;

    if hub.unregister(id).await.is_err() {
        debug!("Hub gone before session {} could unregister", id);
    }
    result
}

async fn read_until_closed<S, E>(
    id: SessionId,
    stream: &mut S,
    hub: &HubHandle,
    read_timeout: Duration,
) -> SessionResult<()>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let next = timeout(read_timeout, stream.next())
            .await
            .map_err(|_| SessionError::ReadTimeout(read_timeout))?;

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(SessionError::Read(e.to_string())),
            None => return Ok(()),
        };

        if let Message::Close(frame) = &message {
            debug!("Session {} requested close: {:?}", id, frame);
            return Ok(());
        }

        // Ping and pong only refresh the read deadline
        let Some(raw) = inbound_payload(message) else {
            continue;
        };

        let payload = normalize_payload(&raw);
        if payload.is_empty() {
            debug!("Session {} sent an empty frame", id);
            continue;
        }

        debug!("Session {} sent {} bytes", id, payload.len());
        hub.broadcast(id, Payload::from(payload))
            .await
            .map_err(|_| SessionError::HubClosed)?;
    }
}
