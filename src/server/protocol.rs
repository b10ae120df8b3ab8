//! Wire protocol
//!
//! The relay has no message schema beyond a one-time identity announcement.
//! Everything else on the wire is either an opaque relayed payload or an empty
//! keepalive frame, all sent as binary WebSocket messages. Each keepalive is
//! paired with a transport ping so that a listening peer answers with a pong.

use std::fmt;
#[cfg(test)]
use std::str::FromStr;

#[cfg(test)]
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;

use crate::hub::SessionId;

/// Leading token of the identity announcement
pub const ANNOUNCE_PREFIX: &str = "PlayerID";

/// Separator between announcement fields
pub const ANNOUNCE_SEPARATOR: char = '_';

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[cfg(test)]
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Missing announcement prefix")]
    MissingPrefix,

    #[error("Invalid session id: {0}")]
    InvalidId(String),
}

/// Result type for protocol operations
#[cfg(test)]
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Identity Announcement
// ============================================================================

/// First frame a session receives: its own id and the participant list
///
/// Rendered as `PlayerID_<id>_<ids>` where `<ids>` is the underscore-joined
/// participant list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAnnouncement {
    pub id: SessionId,
    pub participants: Vec<SessionId>,
}

impl IdentityAnnouncement {
    pub fn new(id: SessionId, participants: Vec<SessionId>) -> Self {
        Self { id, participants }
    }

    /// Encode as a WebSocket frame
    pub fn to_frame(&self) -> Message {
        Message::Binary(self.to_string().into_bytes())
    }
}

impl fmt::Display for IdentityAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = ANNOUNCE_SEPARATOR.to_string();
        let ids: Vec<String> = self.participants.iter().map(|id| id.to_string()).collect();
        write!(
            f,
            "{prefix}{sep}{id}{sep}{ids}",
            prefix = ANNOUNCE_PREFIX,
            id = self.id,
            ids = ids.join(sep.as_str())
        )
    }
}

// Only clients parse announcements
#[cfg(test)]
impl FromStr for IdentityAnnouncement {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        let rest = s
            .strip_prefix(ANNOUNCE_PREFIX)
            .and_then(|rest| rest.strip_prefix(ANNOUNCE_SEPARATOR))
            .ok_or(ProtocolError::MissingPrefix)?;

        let mut fields = rest.split(ANNOUNCE_SEPARATOR);
        let id = parse_id(fields.next().unwrap_or_default())?;
        let participants = fields
            .filter(|field| !field.is_empty())
            .map(parse_id)
            .collect::<ProtocolResult<Vec<_>>>()?;

        Ok(Self { id, participants })
    }
}

#[cfg(test)]
fn parse_id(field: &str) -> ProtocolResult<SessionId> {
    field
        .parse::<u64>()
        .map(SessionId::new)
        .map_err(|_| ProtocolError::InvalidId(field.to_string()))
}

// ============================================================================
// Payload Frames
// ============================================================================

/// Normalize an inbound payload before relaying it
///
/// Each line break (`\r\n`, `\n` or `\r`) becomes a single space, then leading
/// and trailing whitespace is trimmed, so a relayed payload is always one line.
pub fn normalize_payload(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter().copied().peekable();

    while let Some(byte) = bytes.next() {
        match byte {
            b'\r' => {
                if bytes.peek() == Some(&b'\n') {
                    bytes.next();
                }
                out.push(b' ');
            }
            b'\n' => out.push(b' '),
            other => out.push(other),
        }
    }

    out.trim_ascii().to_vec()
}

/// Frame carrying a relayed payload
pub fn relay_frame(payload: &[u8]) -> Message {
    Message::Binary(payload.to_vec())
}

/// Zero-length liveness frame
pub fn keepalive_frame() -> Message {
    Message::Binary(Vec::new())
}

/// Transport ping sent alongside each keepalive
///
/// Peers answer automatically with a pong, which refreshes the read deadline
/// of a session that never sends data of its own.
pub fn ping_frame() -> Message {
    Message::Ping(Vec::new())
}

/// Extract the payload bytes of an inbound data frame
///
/// Control frames yield `None`.
pub fn inbound_payload(message: Message) -> Option<Vec<u8>> {
    match message {
        Message::Text(text) => Some(text.into_bytes()),
        Message::Binary(data) => Some(data),
        _ => None,
    }
}
