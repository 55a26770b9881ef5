//! Single-pass candidate iteration.

use crate::{PeerError, PeerFeedback, Result};
use ferry_types::{PeerId, PeerInfo};
use std::collections::HashSet;
use std::sync::Arc;

/// Lazily ranked, non-repeating sequence of candidate peers.
///
/// Every peer is drawn at most once. Peers marked as succeeded are never
/// drawn. The remaining candidates are re-ranked against the shared
/// [`PeerFeedback`] on each draw, so failures reported by concurrent
/// batches shift the order of later draws.
#[derive(Debug)]
pub struct PeerIterator {
    remaining: Vec<PeerInfo>,
    succeeded: HashSet<PeerId>,
    feedback: Arc<PeerFeedback>,
    width: usize,
}

impl PeerIterator {
    /// Creates an iterator over `peers` aiming for `width` placements.
    ///
    /// Duplicate entries are collapsed, keeping the first occurrence.
    pub fn new(peers: Vec<PeerInfo>, feedback: Arc<PeerFeedback>, width: usize) -> Result<Self> {
        let mut seen = HashSet::with_capacity(peers.len());
        let remaining: Vec<PeerInfo> = peers.into_iter().filter(|p| seen.insert(p.id)).collect();
        if remaining.is_empty() {
            return Err(PeerError::NoPeers);
        }
        Ok(Self {
            remaining,
            succeeded: HashSet::with_capacity(width),
            feedback,
            width,
        })
    }

    /// Number of placements the caller is looking for.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Excludes `peer` from every later draw.
    pub fn mark_succeeded(&mut self, peer: PeerId) {
        self.succeeded.insert(peer);
    }

    /// Returns true if `peer` has been marked as succeeded.
    pub fn is_succeeded(&self, peer: &PeerId) -> bool {
        self.succeeded.contains(peer)
    }

    /// Peers marked as succeeded so far.
    pub fn succeeded(&self) -> &HashSet<PeerId> {
        &self.succeeded
    }

    /// Number of peers that could still be drawn.
    pub fn remaining(&self) -> usize {
        self.remaining
            .iter()
            .filter(|p| !self.succeeded.contains(&p.id))
            .count()
    }

    /// The feedback table used for ranking.
    pub fn feedback(&self) -> &Arc<PeerFeedback> {
        &self.feedback
    }
}

impl Iterator for PeerIterator {
    type Item = PeerInfo;

    fn next(&mut self) -> Option<PeerInfo> {
        let succeeded = &self.succeeded;
        self.remaining.retain(|p| !succeeded.contains(&p.id));

        // min_by_key keeps the first of equal keys, preserving directory order
        let (pos, _) = self
            .remaining
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| self.feedback.rank(&p.id))?;
        Some(self.remaining.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::SocketAddr;

    fn peer(n: u8) -> PeerInfo {
        let address: SocketAddr = format!("127.0.0.1:{}", 4000 + n as u16).parse().unwrap();
        PeerInfo::new(PeerId::from_bytes([n; 32]), address)
    }

    fn ids(peers: impl IntoIterator<Item = PeerInfo>) -> Vec<u8> {
        peers.into_iter().map(|p| p.id.as_bytes()[0]).collect()
    }

    #[test]
    fn test_empty_directory_is_error() {
        let err = PeerIterator::new(Vec::new(), Arc::default(), 4).unwrap_err();
        assert_eq!(err, PeerError::NoPeers);
    }

    #[test]
    fn test_directory_order_without_feedback() {
        let it = PeerIterator::new((1..=4).map(peer).collect(), Arc::default(), 4).unwrap();
        assert_eq!(ids(it), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_duplicates_collapsed() {
        let it = PeerIterator::new(vec![peer(1), peer(2), peer(1)], Arc::default(), 2).unwrap();
        assert_eq!(ids(it), vec![1, 2]);
    }

    #[test]
    fn test_succeeded_peers_skipped() {
        let mut it = PeerIterator::new((1..=4).map(peer).collect(), Arc::default(), 4).unwrap();
        it.mark_succeeded(peer(2).id);
        it.mark_succeeded(peer(3).id);
        assert_eq!(it.remaining(), 2);
        assert_eq!(ids(&mut it), vec![1, 4]);
        assert!(it.next().is_none());
    }

    #[test]
    fn test_feedback_reorders_mid_run() {
        let feedback = Arc::new(PeerFeedback::default());
        let mut it = PeerIterator::new((1..=4).map(peer).collect(), feedback.clone(), 4).unwrap();

        assert_eq!(it.next().unwrap().id, peer(1).id);

        feedback.record(&peer(2).id, false);
        feedback.record(&peer(4).id, true);

        assert_eq!(ids(it), vec![4, 3, 2]);
    }

    proptest! {
        /// Property: no peer is drawn twice and succeeded peers are never drawn.
        #[test]
        fn prop_draws_are_unique(
            ids_in in prop::collection::vec(1u8..32, 1..40),
            succeeded in prop::collection::hash_set(1u8..32, 0..10),
            failures in prop::collection::vec(1u8..32, 0..20),
        ) {
            let feedback = Arc::new(PeerFeedback::default());
            for f in &failures {
                feedback.record(&peer(*f).id, false);
            }
            let mut it = PeerIterator::new(ids_in.iter().copied().map(peer).collect(), feedback, 12).unwrap();
            for s in &succeeded {
                it.mark_succeeded(peer(*s).id);
            }

            let drawn = ids(&mut it);
            let unique: HashSet<u8> = drawn.iter().copied().collect();
            prop_assert_eq!(unique.len(), drawn.len());
            for d in &drawn {
                prop_assert!(!succeeded.contains(d));
            }
            let expected: HashSet<u8> = ids_in.iter().copied().filter(|i| !succeeded.contains(i)).collect();
            prop_assert_eq!(unique, expected);
        }
    }
}
