//! Tracks which connection, if any, currently holds each character.
//!
//! One character can be logged in from at most one connection at a
//! time; a second login attempt while the first is active is rejected
//! with "Already connected." rather than silently displacing it.

use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("character is already connected from another session")]
pub struct AlreadyConnected;

#[derive(Default)]
pub struct SessionRegistry {
    online: DashMap<String, u64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `character_id` for `connection_id`. Fails if the character
    /// is already claimed by a different connection.
    pub fn register(&self, character_id: &str, connection_id: u64) -> Result<(), AlreadyConnected> {
        match self.online.entry(character_id.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(connection_id);
                Ok(())
            }
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AlreadyConnected),
        }
    }

    /// Release `character_id`, but only if it is still held by
    /// `connection_id` — a stale unregister from an already-replaced
    /// entry must never evict the new holder.
    pub fn unregister(&self, character_id: &str, connection_id: u64) {
        self.online.remove_if(character_id, |_, held_by| *held_by == connection_id);
    }

    pub fn is_online(&self, character_id: &str) -> bool {
        self.online.contains_key(character_id)
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registration_succeeds() {
        let reg = SessionRegistry::new();
        assert!(reg.register("alice", 1).is_ok());
        assert!(reg.is_online("alice"));
    }

    #[test]
    fn second_registration_for_same_character_is_rejected() {
        let reg = SessionRegistry::new();
        reg.register("alice", 1).unwrap();
        assert_eq!(reg.register("alice", 2), Err(AlreadyConnected));
    }

    #[test]
    fn unregister_frees_the_character_for_reconnection() {
        let reg = SessionRegistry::new();
        reg.register("alice", 1).unwrap();
        reg.unregister("alice", 1);
        assert!(!reg.is_online("alice"));
        assert!(reg.register("alice", 2).is_ok());
    }

    #[test]
    fn stale_unregister_does_not_evict_a_newer_holder() {
        let reg = SessionRegistry::new();
        reg.register("alice", 1).unwrap();
        reg.unregister("alice", 1);
        reg.register("alice", 2).unwrap();
        reg.unregister("alice", 1);
        assert!(reg.is_online("alice"));
    }
}
