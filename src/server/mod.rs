//! WebSocket server module
//!
//! Accepts connections, upgrades them to WebSockets and defines the frames
//! exchanged with peers.

mod protocol;
mod websocket;

pub use protocol::*;
pub use websocket::*;
