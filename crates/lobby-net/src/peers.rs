//! Friend connection tracking.
//!
//! Maintains an in-memory map of connected friends and the services each
//! one announced, and exposes it to the engine as a [`Directory`].

use std::collections::{HashMap, HashSet};

use lobby_core::Directory;
use lobby_shared::PeerId;
use parking_lot::RwLock;
use tracing::debug;

/// Information about a connected friend.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Service types the friend announced
    pub services: HashSet<u32>,
    /// Unix seconds
    pub connected_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    peers: HashMap<PeerId, ConnectionInfo>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly connected friend and the services it runs.
    pub fn on_connected(&mut self, peer_id: PeerId, services: impl IntoIterator<Item = u32>) {
        let services: HashSet<u32> = services.into_iter().collect();
        debug!(
            peer = %peer_id.short(),
            services = ?services,
            "Tracking new friend connection"
        );

        self.peers.insert(
            peer_id,
            ConnectionInfo {
                services,
                connected_at: chrono::Utc::now().timestamp(),
            },
        );
    }

    /// Forget `peer_id`. Returns `false` if it was not tracked.
    pub fn on_disconnected(&mut self, peer_id: &PeerId) -> bool {
        let Some(info) = self.peers.remove(peer_id) else {
            return false;
        };
        debug!(
            peer = %peer_id.short(),
            connected_secs = chrono::Utc::now().timestamp() - info.connected_at,
            "Removed friend from tracker"
        );
        true
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn offers_service(&self, peer_id: &PeerId, service_type: u32) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|info| info.services.contains(&service_type))
    }
}

/// Shared, lockable [`PeerTracker`] with our own identity.
pub struct PeerDirectory {
    own_id: PeerId,
    tracker: RwLock<PeerTracker>,
}

impl PeerDirectory {
    pub fn new(own_id: PeerId) -> Self {
        Self {
            own_id,
            tracker: RwLock::new(PeerTracker::new()),
        }
    }

    pub fn on_connected(&self, peer_id: PeerId, services: impl IntoIterator<Item = u32>) {
        self.tracker.write().on_connected(peer_id, services);
    }

    pub fn on_disconnected(&self, peer_id: &PeerId) {
        self.tracker.write().on_disconnected(peer_id);
    }

    pub fn peer_count(&self) -> usize {
        self.tracker.read().peer_count()
    }
}

impl Directory for PeerDirectory {
    fn own_id(&self) -> PeerId {
        self.own_id
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.tracker.read().connected_peers()
    }

    fn peer_offers_service(&self, peer: &PeerId, service_type: u32) -> bool {
        self.tracker.read().offers_service(peer, service_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_shared::constants::LOBBY_SERVICE_TYPE;

    #[test]
    fn test_connect_disconnect() {
        let mut tracker = PeerTracker::new();
        let peer = PeerId::random();

        assert!(!tracker.is_connected(&peer));
        tracker.on_connected(peer, [LOBBY_SERVICE_TYPE]);
        assert!(tracker.is_connected(&peer));
        assert_eq!(tracker.peer_count(), 1);

        assert!(tracker.on_disconnected(&peer));
        assert!(!tracker.on_disconnected(&peer));
        assert!(!tracker.is_connected(&peer));
        assert_eq!(tracker.peer_count(), 0);
    }

    #[test]
    fn test_service_filtering() {
        let directory = PeerDirectory::new(PeerId::random());
        let lobby_peer = PeerId::random();
        let other_peer = PeerId::random();

        directory.on_connected(lobby_peer, [LOBBY_SERVICE_TYPE, 0x0001]);
        directory.on_connected(other_peer, [0x0001]);

        assert_eq!(directory.connected_peers().len(), 2);
        assert!(directory.peer_offers_service(&lobby_peer, LOBBY_SERVICE_TYPE));
        assert!(!directory.peer_offers_service(&other_peer, LOBBY_SERVICE_TYPE));

        directory.on_disconnected(&lobby_peer);
        assert!(!directory.peer_offers_service(&lobby_peer, LOBBY_SERVICE_TYPE));
        assert_eq!(directory.peer_count(), 1);
    }
}
