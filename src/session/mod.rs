//! Connection session module
//!
//! One session per connected peer: an inbound loop feeding the hub and an
//! outbound loop owning every write to the transport.

mod connection;
mod inbound;
mod outbound;

pub use connection::*;
pub use inbound::*;
pub use outbound::*;
