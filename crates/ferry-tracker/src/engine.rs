//! The distribution engine.
//!
//! Fragments are grouped into one batch per shard index, one fragment per
//! segment. Each batch must land on a single peer. Peers already credited
//! on the chain are excluded up front; every other candidate comes from a
//! single-pass [`PeerIterator`](ferry_peers::PeerIterator), so a peer is
//! tried at most once per run and never receives two batches.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use ferry_peers::{PeerDirectory, PeerIterator};
use ferry_transfer::{FragmentTransport, TransferError};
use ferry_types::{CompleteInfo, PeerId, PeerInfo, Segment};
use tracing::{debug, info, warn};

use crate::{ChainClient, Result, RetryPolicy, TrackerError};

/// Distribution settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionConfig {
    /// Per-fragment retry policy on one peer.
    pub retry: RetryPolicy,
    /// Placements the peer iterator aims for.
    pub shard_width: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            shard_width: ferry_types::SHARD_WIDTH,
        }
    }
}

/// Outcome of one distribution run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    /// Batches placed in this run, by shard index.
    pub placed: BTreeMap<u8, PeerId>,
    /// Indices the chain already reported complete.
    pub already_complete: Vec<u8>,
    /// Indices no candidate peer accepted.
    pub unplaced: Vec<u8>,
    /// Peers holding a batch, chain-credited ones included.
    pub succeeded_peers: HashSet<PeerId>,
}

impl DistributionReport {
    /// Returns true if every index is placed or already complete.
    pub fn is_complete(&self) -> bool {
        self.unplaced.is_empty()
    }
}

/// Groups fragment paths by one-based shard index.
///
/// Returns `None` when there are no segments, a segment has no
/// fragments, the segments disagree on width, or the width exceeds the
/// index range.
pub fn group_by_index(segments: &[Segment]) -> Option<BTreeMap<u8, Vec<PathBuf>>> {
    let width = segments.first()?.width();
    if width == 0 || width > u8::MAX as usize || segments.iter().any(|s| s.width() != width) {
        return None;
    }
    let mut groups = BTreeMap::new();
    for index in 0..width {
        let batch = segments
            .iter()
            .map(|s| PathBuf::from(&s.fragment_hashes[index]))
            .collect();
        groups.insert((index + 1) as u8, batch);
    }
    Some(groups)
}

/// Places fragment batches onto storage peers.
#[derive(Clone)]
pub struct DistributionEngine {
    chain: Arc<dyn ChainClient>,
    peers: Arc<dyn PeerDirectory>,
    transport: Arc<dyn FragmentTransport>,
    config: DistributionConfig,
}

impl DistributionEngine {
    /// Creates an engine.
    pub fn new(
        chain: Arc<dyn ChainClient>,
        peers: Arc<dyn PeerDirectory>,
        transport: Arc<dyn FragmentTransport>,
        config: DistributionConfig,
    ) -> Self {
        Self {
            chain,
            peers,
            transport,
            config,
        }
    }

    /// The engine's settings.
    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Ensures every shard index of `root_hash` sits on some peer.
    ///
    /// Indices no peer accepts, an empty directory included, are listed in
    /// the report rather than failing the run.
    pub async fn distribute(
        &self,
        root_hash: &str,
        segments: &[Segment],
        complete: &[CompleteInfo],
    ) -> Result<DistributionReport> {
        let groups = group_by_index(segments).ok_or_else(|| TrackerError::Corrupt {
            root_hash: root_hash.to_string(),
            reason: "segments disagree on shard width".to_string(),
        })?;
        let mut succeeded = HashSet::new();
        for entry in complete {
            match self.chain.query_miner_peer(&entry.miner).await {
                Ok(Some(peer)) => {
                    succeeded.insert(peer);
                }
                Ok(None) => debug!(root_hash, miner = %entry.miner, "credited miner has no peer"),
                Err(e) => debug!(root_hash, miner = %entry.miner, error = %e, "miner lookup failed"),
            }
        }

        let mut report = DistributionReport::default();
        let mut candidates: Option<PeerIterator> = None;
        let mut no_peers = false;
        for (index, batch) in &groups {
            let index = *index;
            if complete.iter().any(|c| c.index == index) {
                info!(root_hash, index, "batch already reported");
                report.already_complete.push(index);
                continue;
            }

            // The directory is only consulted once a batch needs a peer.
            if candidates.is_none() && !no_peers {
                match self.peers.iter_peers(self.config.shard_width) {
                    Ok(mut iter) => {
                        for peer in &succeeded {
                            iter.mark_succeeded(*peer);
                        }
                        candidates = Some(iter);
                    }
                    Err(e) => {
                        warn!(root_hash, error = %e, "no candidate peers");
                        no_peers = true;
                    }
                }
            }

            info!(root_hash, index, fragments = batch.len(), "preparing batch");
            let mut placed = None;
            if let Some(iter) = candidates.as_mut() {
                for peer in iter.by_ref() {
                    if self.place_batch(root_hash, index, batch, &peer).await {
                        placed = Some(peer.id);
                        break;
                    }
                }
            }

            match placed {
                Some(peer) => {
                    succeeded.insert(peer);
                    if let Some(iter) = candidates.as_mut() {
                        iter.mark_succeeded(peer);
                    }
                    report.placed.insert(index, peer);
                }
                None => {
                    warn!(root_hash, index, "no peer accepted batch");
                    report.unplaced.push(index);
                }
            }
        }

        report.succeeded_peers = succeeded;
        Ok(report)
    }

    /// Pushes one batch to one peer and reports the outcome to the directory.
    async fn place_batch(&self, root_hash: &str, index: u8, batch: &[PathBuf], peer: &PeerInfo) -> bool {
        if let Err(e) = self.transport.connect(peer).await {
            debug!(root_hash, peer = %peer, error = %e, "peer unreachable");
            self.peers.report_outcome(&peer.id, false);
            return false;
        }

        info!(root_hash, index, peer = %peer, "transferring batch");
        for (position, fragment) in batch.iter().enumerate() {
            let sent = self
                .config
                .retry
                .execute_while(
                    || self.transport.write_fragment(peer, root_hash, fragment),
                    |e: &TransferError| !e.is_integrity(),
                )
                .await;
            if let Err(e) = sent {
                warn!(root_hash, index, peer = %peer, error = %e, "batch transfer failed");
                self.peers.report_outcome(&peer.id, false);
                return false;
            }
            debug!(root_hash, index, position, peer = %peer, "fragment transferred");
        }

        self.peers.report_outcome(&peer.id, true);
        info!(root_hash, index, peer = %peer, "batch transferred");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(n: usize, width: usize) -> Vec<Segment> {
        (0..n)
            .map(|s| {
                Segment::new(
                    format!("/w/root/s{s}"),
                    (0..width).map(|f| format!("/w/root/s{s}f{f}")).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_group_by_index() {
        let groups = group_by_index(&segments(2, 4)).unwrap();
        assert_eq!(groups.len(), 4);
        assert_eq!(
            groups[&1],
            vec![PathBuf::from("/w/root/s0f0"), PathBuf::from("/w/root/s1f0")]
        );
        assert_eq!(
            groups[&4],
            vec![PathBuf::from("/w/root/s0f3"), PathBuf::from("/w/root/s1f3")]
        );
    }

    #[test]
    fn test_group_rejects_ragged_segments() {
        let mut ragged = segments(2, 4);
        ragged[1].fragment_hashes.pop();
        assert!(group_by_index(&ragged).is_none());
        assert!(group_by_index(&[]).is_none());
        assert!(group_by_index(&segments(1, 0)).is_none());
    }
}
