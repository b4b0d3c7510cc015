//! In-memory session store.

use std::collections::HashMap;

use crate::session::CallSession;
use crate::types::call::PeerId;

/// The single source of truth for live call attempts.
///
/// Owned exclusively by the coordinator's worker task; no locking because
/// nothing else ever touches it. At most one non-terminal session exists
/// per peer.
#[derive(Default)]
pub struct SessionStore {
    sessions: HashMap<PeerId, CallSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self, peer: &PeerId) -> Option<&CallSession> {
        self.sessions.get(peer)
    }

    pub fn live_mut(&mut self, peer: &PeerId) -> Option<&mut CallSession> {
        self.sessions.get_mut(peer)
    }

    /// Insert a freshly minted session. Returns false (and leaves the store
    /// untouched) if the peer already has a live one.
    pub fn mint(&mut self, session: CallSession) -> bool {
        let peer = session.peer().clone();
        if self.sessions.contains_key(&peer) {
            return false;
        }
        self.sessions.insert(peer, session);
        true
    }

    /// Remove a session on terminal transition.
    pub fn remove(&mut self, peer: &PeerId) -> Option<CallSession> {
        self.sessions.remove(peer)
    }

    /// True if some *other* peer has a live attempt; used for busy
    /// handling of a second inbound invite.
    pub fn busy_with_other(&self, peer: &PeerId) -> bool {
        self.sessions.keys().any(|p| p != peer)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::call::CallMediaType;

    #[test]
    fn one_live_session_per_peer() {
        let mut store = SessionStore::new();
        let alice = PeerId::from("alice");

        assert!(store.mint(CallSession::new_incoming(
            alice.clone(),
            "Alice".into(),
            CallMediaType::Audio,
        )));
        assert!(!store.mint(CallSession::new_outgoing(
            alice.clone(),
            CallMediaType::Video,
        )));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn busy_only_counts_other_peers() {
        let mut store = SessionStore::new();
        let alice = PeerId::from("alice");
        let bob = PeerId::from("bob");

        store.mint(CallSession::new_incoming(
            alice.clone(),
            "Alice".into(),
            CallMediaType::Audio,
        ));

        assert!(!store.busy_with_other(&alice));
        assert!(store.busy_with_other(&bob));
    }

    #[test]
    fn remove_frees_the_peer() {
        let mut store = SessionStore::new();
        let alice = PeerId::from("alice");
        store.mint(CallSession::new_outgoing(alice.clone(), CallMediaType::Audio));

        assert!(store.remove(&alice).is_some());
        assert!(store.mint(CallSession::new_outgoing(alice, CallMediaType::Audio)));
    }
}
