//! Peer directories.

use crate::{PeerFeedback, PeerIterator, Result};
use ferry_types::{PeerId, PeerInfo};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Source of candidate storage peers and sink for attempt outcomes.
pub trait PeerDirectory: Send + Sync {
    /// Returns the currently known peers.
    fn list_peers(&self) -> Vec<PeerInfo>;

    /// Records the outcome of an attempt against `peer`.
    fn report_outcome(&self, peer: &PeerId, success: bool);

    /// The feedback table outcomes accumulate in.
    fn feedback(&self) -> Arc<PeerFeedback>;

    /// Starts a single-pass iteration over the current peers.
    fn iter_peers(&self, width: usize) -> Result<PeerIterator> {
        PeerIterator::new(self.list_peers(), self.feedback(), width)
    }
}

/// A directory backed by a fixed, configured peer list.
#[derive(Debug, Default)]
pub struct StaticPeerDirectory {
    peers: RwLock<Vec<PeerInfo>>,
    feedback: Arc<PeerFeedback>,
}

impl StaticPeerDirectory {
    /// Creates a directory over `peers`.
    pub fn new(peers: Vec<PeerInfo>) -> Self {
        Self::with_feedback(peers, Arc::new(PeerFeedback::default()))
    }

    /// Creates a directory sharing an existing feedback table.
    pub fn with_feedback(peers: Vec<PeerInfo>, feedback: Arc<PeerFeedback>) -> Self {
        Self {
            peers: RwLock::new(peers),
            feedback,
        }
    }

    /// Adds or replaces a peer.
    pub fn upsert(&self, peer: PeerInfo) {
        let mut peers = self.peers.write();
        match peers.iter_mut().find(|p| p.id == peer.id) {
            Some(existing) => *existing = peer,
            None => peers.push(peer),
        }
    }

    /// Removes a peer. Returns true if it was present.
    pub fn remove(&self, id: &PeerId) -> bool {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|p| &p.id != id);
        peers.len() != before
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Returns true if no peers are known.
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

impl PeerDirectory for StaticPeerDirectory {
    fn list_peers(&self) -> Vec<PeerInfo> {
        self.peers.read().clone()
    }

    fn report_outcome(&self, peer: &PeerId, success: bool) {
        debug!(peer = %peer, success, "peer outcome");
        self.feedback.record(peer, success);
    }

    fn feedback(&self) -> Arc<PeerFeedback> {
        self.feedback.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerError;

    fn peer(n: u8, port: u16) -> PeerInfo {
        PeerInfo::new(
            PeerId::from_bytes([n; 32]),
            format!("127.0.0.1:{port}").parse().unwrap(),
        )
    }

    #[test]
    fn test_upsert_and_remove() {
        let directory = StaticPeerDirectory::new(vec![peer(1, 4001)]);
        directory.upsert(peer(2, 4002));
        directory.upsert(peer(1, 5001));

        let peers = directory.list_peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].address.port(), 5001);

        assert!(directory.remove(&peer(2, 0).id));
        assert!(!directory.remove(&peer(2, 0).id));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_outcomes_steer_iteration() {
        let directory = StaticPeerDirectory::new(vec![peer(1, 4001), peer(2, 4002)]);
        directory.report_outcome(&peer(1, 0).id, false);

        let order: Vec<_> = directory.iter_peers(2).unwrap().map(|p| p.id).collect();
        assert_eq!(order, vec![peer(2, 0).id, peer(1, 0).id]);
    }

    #[test]
    fn test_empty_directory() {
        let directory = StaticPeerDirectory::default();
        assert!(directory.is_empty());
        assert_eq!(directory.iter_peers(4).unwrap_err(), PeerError::NoPeers);
    }
}
