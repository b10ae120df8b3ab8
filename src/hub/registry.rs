//! Participant registry
//!
//! Ordered list of the ids currently registered with the hub. Only the hub
//! control loop holds one, so it needs no locking.

use super::SessionId;

/// Ordered set of live session ids, in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantRegistry {
    ids: Vec<SessionId>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id
    ///
    /// Returns false and leaves the registry untouched if the id is already present.
    pub fn insert(&mut self, id: SessionId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Remove the first occurrence of an id
    ///
    /// Returns false if the id was not present. Linear scan; participant
    /// counts stay small.
    pub fn remove(&mut self, id: SessionId) -> bool {
        match self.ids.iter().position(|existing| *existing == id) {
            Some(index) => {
                self.ids.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in registration order
    pub fn ids(&self) -> &[SessionId] {
        &self.ids
    }

    /// Copy of the current ids
    pub fn snapshot(&self) -> Vec<SessionId> {
        self.ids.clone()
    }
}
