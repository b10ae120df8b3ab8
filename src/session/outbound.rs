//! Outbound loop
//!
//! Sole writer of a session's transport. Drains the outbound queue, turning
//! the first item into the identity announcement, and interleaves keepalive
//! frames on a fixed period. Each keepalive is followed by a transport ping;
//! the peer's pong keeps the inbound read deadline fresh.

use std::fmt;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{self, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{SessionConfig, SessionError, SessionResult};
use crate::hub::{HubHandle, Outbound, SessionId};
use crate::server::{keepalive_frame, ping_frame, relay_frame, IdentityAnnouncement};

/// Announcement state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceState {
    /// Nothing written yet; the next dequeued item becomes the announcement
    AwaitingIdentityAck,
    /// Announcement sent; items are relayed verbatim
    Acknowledged,
}

/// Turns dequeued items into frames
#[derive(Debug)]
pub struct FrameWriter {
    id: SessionId,
    state: AnnounceState,
}

impl FrameWriter {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: AnnounceState::AwaitingIdentityAck,
        }
    }

    /// Frame to write for a dequeued item, or `None` if it should be skipped
    pub fn frame_for(&mut self, item: Outbound) -> Option<Message> {
        match (self.state, item) {
            (AnnounceState::AwaitingIdentityAck, item) => {
                self.state = AnnounceState::Acknowledged;
                let participants = match item {
                    Outbound::Announce(participants) => participants,
                    // The registration snapshot never arrived; the payload is consumed
                    Outbound::Payload(_) => vec![self.id],
                };
                Some(IdentityAnnouncement::new(self.id, participants).to_frame())
            }
            (AnnounceState::Acknowledged, Outbound::Payload(payload)) => {
                Some(relay_frame(&payload))
            }
            (AnnounceState::Acknowledged, Outbound::Announce(_)) => {
                warn!("Session {} already announced, ignoring repeat", self.id);
                None
            }
        }
    }
}

/// Run the outbound loop until the queue closes or a write fails
///
/// On exit the session is unregistered and the transport is closed.
pub async fn outbound_loop<K>(
    id: SessionId,
    mut sink: K,
    mut queue: mpsc::Receiver<Outbound>,
    hub: HubHandle,
    config: SessionConfig,
) -> SessionResult<()>
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    let result = write_until_closed(id, &mut sink, &mut queue, &config).await;

    queue.close();
    if hub.unregister(id).await.is_err() {
        debug!("Hub gone before session {} could unregister", id);
    }
    match timeout(config.write_timeout, sink.close()).await {
        Ok(Ok(())) => debug!("Session {} transport closed", id),
        Ok(Err(e)) => debug!("Session {} transport close failed: {}", id, e),
        Err(_) => debug!("Session {} transport close timed out", id),
    }
    result
}

async fn write_until_closed<K>(
    id: SessionId,
    sink: &mut K,
    queue: &mut mpsc::Receiver<Outbound>,
    config: &SessionConfig,
) -> SessionResult<()>
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    let mut keepalive = time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut writer = FrameWriter::new(id);

    loop {
        tokio::select! {
            // Queued frames win ties so the announcement is never preceded by a keepalive
            biased;

            item = queue.recv() => {
                let Some(item) = item else {
                    debug!("Session {} outbound queue closed", id);
                    return Ok(());
                };
                if let Some(frame) = writer.frame_for(item) {
                    write_frame(sink, frame, config.write_timeout).await?;
                }
            }
            _ = keepalive.tick() => {
                write_frame(sink, keepalive_frame(), config.write_timeout).await?;
                write_frame(sink, ping_frame(), config.write_timeout).await?;
            }
        }
    }
}

async fn write_frame<K>(sink: &mut K, frame: Message, limit: Duration) -> SessionResult<()>
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    match timeout(limit, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Write(e.to_string())),
        Err(_) => Err(SessionError::WriteTimeout(limit)),
    }
}
