//! Registry of live client connections.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use hashbrown::HashMap;
use parking_lot::Mutex;

#[derive(Clone, Debug)]
pub struct SessionState {
    pub connected_at: Instant,
    pub last_seen: Instant,
    pub commands: u64,
}

/// Shared table of sessions keyed by peer address.
#[derive(Clone, Debug, Default)]
pub struct SessionManager {
    store: Arc<Mutex<HashMap<SocketAddr, SessionState>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new session for the given peer.
    pub fn create_session(
        &self,
        peer: SocketAddr,
    ) {
        let now = Instant::now();
        self.store.lock().insert(
            peer,
            SessionState {
                connected_at: now,
                last_seen: now,
                commands: 0,
            },
        );
    }

    /// Retrieves a copy of the session state for the given peer.
    pub fn get_session(
        &self,
        peer: &SocketAddr,
    ) -> Option<SessionState> {
        self.store.lock().get(peer).cloned()
    }

    /// Records a line received from the peer.
    /// Returns true if the session was found and updated.
    pub fn update_session(
        &self,
        peer: &SocketAddr,
    ) -> bool {
        if let Some(session) = self.store.lock().get_mut(peer) {
            session.last_seen = Instant::now();
            session.commands += 1;
            true
        } else {
            false
        }
    }

    /// Removes the session for the given peer.
    /// Returns true if a session was removed.
    pub fn remove_session(
        &self,
        peer: &SocketAddr,
    ) -> bool {
        self.store.lock().remove(peer).is_some()
    }

    /// Returns the addresses of all live sessions.
    pub fn list_sessions(&self) -> Vec<SocketAddr> {
        self.store.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle() {
        let sessions = SessionManager::new();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        assert!(!sessions.update_session(&peer));
        sessions.create_session(peer);
        assert!(sessions.update_session(&peer));
        assert!(sessions.update_session(&peer));
        assert_eq!(sessions.get_session(&peer).unwrap().commands, 2);
        assert_eq!(sessions.list_sessions(), vec![peer]);

        assert!(sessions.remove_session(&peer));
        assert!(!sessions.remove_session(&peer));
        assert!(sessions.is_empty());
    }
}
