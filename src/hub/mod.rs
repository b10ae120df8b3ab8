//! Broadcast hub module
//!
//! Identity assignment, the participant registry, and the single control loop
//! that serializes registration and fan-out.

mod coordinator;
mod identity;
mod registry;

pub use coordinator::*;
pub use identity::*;
pub use registry::*;
