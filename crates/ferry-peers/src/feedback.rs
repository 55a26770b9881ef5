//! Per-peer transfer outcome scores.

use ferry_types::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a failure pushes a peer behind every other candidate.
pub const DEFAULT_FAILURE_COOLDOWN: Duration = Duration::from_secs(10 * 60);

/// Accumulated outcomes for one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerScore {
    /// Successful batch placements.
    pub successes: u64,
    /// Failed connection or transfer attempts.
    pub failures: u64,
    /// When the most recent failure was reported.
    pub last_failure: Option<Instant>,
}

impl PeerScore {
    /// Successes minus failures.
    pub fn net(&self) -> i64 {
        let successes = i64::try_from(self.successes).unwrap_or(i64::MAX);
        let failures = i64::try_from(self.failures).unwrap_or(i64::MAX);
        successes.saturating_sub(failures)
    }

    /// Returns true if the last failure is younger than `cooldown`.
    pub fn failed_within(&self, cooldown: Duration) -> bool {
        self.last_failure
            .is_some_and(|at| at.elapsed() < cooldown)
    }
}

/// Concurrent outcome table shared by every distribution batch.
#[derive(Debug)]
pub struct PeerFeedback {
    scores: RwLock<HashMap<PeerId, PeerScore>>,
    cooldown: Duration,
}

impl Default for PeerFeedback {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_COOLDOWN)
    }
}

impl PeerFeedback {
    /// Creates an empty table with the given failure cooldown.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            scores: RwLock::new(HashMap::new()),
            cooldown,
        }
    }

    /// Records the outcome of one attempt against `peer`.
    pub fn record(&self, peer: &PeerId, success: bool) {
        let mut scores = self.scores.write();
        let score = scores.entry(*peer).or_default();
        if success {
            score.successes = score.successes.saturating_add(1);
        } else {
            score.failures = score.failures.saturating_add(1);
            score.last_failure = Some(Instant::now());
        }
    }

    /// Returns the score of `peer`, if any outcome was recorded.
    pub fn score(&self, peer: &PeerId) -> Option<PeerScore> {
        self.scores.read().get(peer).copied()
    }

    /// Ordering key: lower sorts first.
    ///
    /// Recently failing peers sort last; otherwise more net successes
    /// sort first.
    pub fn rank(&self, peer: &PeerId) -> (bool, i64) {
        match self.score(peer) {
            Some(score) => (score.failed_within(self.cooldown), -score.net()),
            None => (false, 0),
        }
    }

    /// Returns the failure cooldown.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 32])
    }

    #[test]
    fn test_record_outcomes() {
        let feedback = PeerFeedback::default();
        feedback.record(&peer(1), true);
        feedback.record(&peer(1), true);
        feedback.record(&peer(1), false);

        let score = feedback.score(&peer(1)).unwrap();
        assert_eq!(score.successes, 2);
        assert_eq!(score.failures, 1);
        assert_eq!(score.net(), 1);
        assert!(score.last_failure.is_some());
        assert!(feedback.score(&peer(2)).is_none());
    }

    #[test]
    fn test_rank_orders_failures_last() {
        let feedback = PeerFeedback::default();
        feedback.record(&peer(1), true);
        feedback.record(&peer(1), true);
        feedback.record(&peer(2), true);
        feedback.record(&peer(2), true);
        feedback.record(&peer(2), true);
        feedback.record(&peer(2), false);

        // peer 2 has more net successes but failed just now
        assert!(feedback.rank(&peer(1)) < feedback.rank(&peer(3)));
        assert!(feedback.rank(&peer(3)) < feedback.rank(&peer(2)));
    }

    #[test]
    fn test_failure_expires_after_cooldown() {
        let feedback = PeerFeedback::new(Duration::ZERO);
        feedback.record(&peer(1), false);
        assert_eq!(feedback.rank(&peer(1)), (false, 1));
    }

    #[test]
    fn test_concurrent_updates() {
        let feedback = Arc::new(PeerFeedback::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let feedback = feedback.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        feedback.record(&peer(1), i % 2 == 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let score = feedback.score(&peer(1)).unwrap();
        assert_eq!(score.successes, 400);
        assert_eq!(score.failures, 400);
    }
}
