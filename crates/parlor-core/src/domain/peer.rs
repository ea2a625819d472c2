//! Discovered peers and the deduplicating set discovery writes into.

use std::net::{IpAddr, SocketAddr};

use tracing::trace;

/// A candidate opponent found on the LAN.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveredPeer {
    pub name: String,
    pub ip: IpAddr,
    /// TCP port the peer will listen on if it ends up hosting.
    pub p2p_port: u16,
    /// Creation time (ms since epoch) of the peer's own discovery session.
    pub timestamp: u64,
}

impl DiscoveredPeer {
    /// Address of the peer's session listener.
    pub fn p2p_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.p2p_port)
    }
}

/// Discovered peers keyed by display name.
///
/// The first response under a given name wins; later ones are ignored.
/// Entries carrying the local name are never recorded.  Callers that share
/// the set between tasks wrap it in a mutex so that check-then-insert is a
/// single step per candidate.
#[derive(Debug, Clone)]
pub struct PeerSet {
    local_name: String,
    peers: Vec<DiscoveredPeer>,
}

impl PeerSet {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            peers: Vec::new(),
        }
    }

    /// Records `peer` unless it is ourselves or its name is already known.
    ///
    /// Returns `true` if the peer was added.
    pub fn insert(&mut self, peer: DiscoveredPeer) -> bool {
        if peer.name == self.local_name {
            trace!("ignoring own discovery echo from {}", peer.ip);
            return false;
        }
        if self.peers.iter().any(|p| p.name == peer.name) {
            trace!("duplicate discovery response for {:?}", peer.name);
            return false;
        }
        self.peers.push(peer);
        true
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Peers in the order they were first seen.
    pub fn peers(&self) -> &[DiscoveredPeer] {
        &self.peers
    }

    pub fn snapshot(&self) -> Vec<DiscoveredPeer> {
        self.peers.clone()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str, last_octet: u8, ts: u64) -> DiscoveredPeer {
        DiscoveredPeer {
            name: name.to_string(),
            ip: IpAddr::from([192, 168, 1, last_octet]),
            p2p_port: 5000,
            timestamp: ts,
        }
    }

    #[test]
    fn test_insert_adds_new_peer() {
        let mut set = PeerSet::new("me");
        assert!(set.insert(peer("bo", 2, 10)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_insert_keeps_first_response_for_repeated_name() {
        // Arrange
        let mut set = PeerSet::new("me");
        set.insert(peer("bo", 2, 10));

        // Act
        let added = set.insert(peer("bo", 3, 99));

        // Assert
        assert!(!added);
        assert_eq!(set.peers(), &[peer("bo", 2, 10)]);
    }

    #[test]
    fn test_insert_ignores_local_name() {
        let mut set = PeerSet::new("me");
        assert!(!set.insert(peer("me", 7, 1)));
        assert!(set.is_empty());
    }

    #[test]
    fn test_mixed_sequence_has_one_entry_per_name_in_arrival_order() {
        let mut set = PeerSet::new("me");
        for (name, octet) in [("bo", 2), ("cy", 3), ("bo", 4), ("me", 5), ("cy", 6)] {
            set.insert(peer(name, octet, u64::from(octet)));
        }
        let names: Vec<_> = set.peers().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["bo", "cy"]);
        assert_eq!(set.peers()[1].ip, IpAddr::from([192, 168, 1, 3]));
    }

    #[test]
    fn test_clear_allows_name_to_be_recorded_again() {
        let mut set = PeerSet::new("me");
        set.insert(peer("bo", 2, 10));
        set.clear();
        assert!(set.insert(peer("bo", 9, 11)));
    }

    #[test]
    fn test_p2p_addr_combines_ip_and_port() {
        let p = peer("bo", 2, 10);
        assert_eq!(p.p2p_addr(), "192.168.1.2:5000".parse().unwrap());
    }
}
