//! Session identity
//!
//! Ids are handed out by an atomic counter owned by the acceptance side and
//! are never recycled for the lifetime of the process.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one connected participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of new session ids
///
/// Safe to share between concurrently accepting tasks; every call to
/// [`IdAllocator::assign_next`] advances the counter exactly once.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator whose first id is 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create an allocator whose first id is `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Take the next id
    pub fn assign_next(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
