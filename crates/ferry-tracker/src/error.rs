//! Tracker error types.

use ferry_peers::PeerError;
use ferry_transfer::TransferError;
use thiserror::Error;

/// Errors raised by the persisted job ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No record exists under the key.
    #[error("no job record for {0}")]
    NotFound(String),

    /// The record exists but cannot be used.
    #[error("corrupt job record {key}: {reason}")]
    Corrupt {
        /// Ledger key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The key is not usable as a file name.
    #[error("invalid ledger key: {0:?}")]
    InvalidKey(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by the chain collaborator.
///
/// "Not found" is not an error; queries return `Ok(None)` for it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The chain endpoint could not be reached.
    #[error("chain unavailable: {0}")]
    Unavailable(String),

    /// The chain refused a transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Errors reported by the sharding collaborator.
#[derive(Debug, Error)]
pub enum ShardError {
    /// Sharding failed.
    #[error("sharding failed: {0}")]
    Failed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the tracker treats a failed job pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Infrastructure hiccup; retried on the next sweep.
    Transient,
    /// Data integrity violation; the job or transfer is aborted.
    Integrity,
    /// The owner revoked the gateway; the job is dropped.
    Deauthorized,
    /// A peer broke the wire protocol.
    Protocol,
    /// No peer could take a batch; the job stays pending.
    Exhausted,
}

impl Disposition {
    /// Returns true if the job record no longer exists after this outcome.
    pub fn is_terminal(self) -> bool {
        matches!(self, Disposition::Integrity | Disposition::Deauthorized)
    }
}

/// Errors that can occur while servicing a job.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Ledger error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Chain error.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Sharding error.
    #[error("shard error: {0}")]
    Shard(#[from] ShardError),

    /// Peer selection error.
    #[error("peer error: {0}")]
    Peers(#[from] PeerError),

    /// Transfer error.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// The job's data is inconsistent; the record was removed.
    #[error("job {root_hash} is corrupt: {reason}")]
    Corrupt {
        /// Ledger key.
        root_hash: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The owner no longer authorizes this gateway.
    #[error("job {root_hash}: owner {owner} deauthorized this gateway")]
    Deauthorized {
        /// Ledger key.
        root_hash: String,
        /// Owner account, hex encoded.
        owner: String,
    },

    /// A storage order was submitted but is not visible yet.
    #[error("storage order for {0} not visible after submission")]
    OrderMissing(String),

    /// Another owner holds a pending order and this gateway already tracks it.
    #[error("storage order for {0} is already pending")]
    DuplicateOrder(String),
}

impl TrackerError {
    /// Classifies the error for the tracker's terminal/retry decision.
    pub fn disposition(&self) -> Disposition {
        match self {
            TrackerError::Ledger(LedgerError::Corrupt { .. }) => Disposition::Integrity,
            TrackerError::Ledger(_) => Disposition::Transient,
            TrackerError::Chain(_) => Disposition::Transient,
            TrackerError::Shard(_) => Disposition::Transient,
            TrackerError::Peers(_) => Disposition::Exhausted,
            TrackerError::Transfer(e) if e.is_integrity() => Disposition::Integrity,
            TrackerError::Transfer(e) if e.is_protocol_violation() => Disposition::Protocol,
            TrackerError::Transfer(_) => Disposition::Transient,
            TrackerError::Corrupt { .. } => Disposition::Integrity,
            TrackerError::Deauthorized { .. } => Disposition::Deauthorized,
            TrackerError::OrderMissing(_) => Disposition::Transient,
            TrackerError::DuplicateOrder(_) => Disposition::Transient,
        }
    }
}

/// A specialized Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
