//! Transfer error types.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The peer did not acknowledge a handshake step in time.
    #[error("timed out after {timeout:?} waiting for {step} acknowledgement")]
    Timeout {
        /// Handshake step that was waiting.
        step: &'static str,
        /// How long it waited.
        timeout: Duration,
    },

    /// The peer acknowledged a handshake step with an error status.
    #[error("peer rejected {0}")]
    Rejected(&'static str),

    /// The connection closed while a handshake step was waiting.
    #[error("connection closed during {0}")]
    Closed(&'static str),

    /// The received file size disagrees with the declared size.
    #[error("size mismatch: declared {declared}, received {received}")]
    SizeMismatch {
        /// Size announced in the end frame.
        declared: u64,
        /// Bytes actually written.
        received: u64,
    },

    /// A chunk arrived with no receive file announced.
    #[error("file chunk without an announced target")]
    NoReceiveTarget,

    /// A peer announced a file name that would escape the receive directory.
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    /// A frame kind that is not valid in this position.
    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),

    /// The receive loop panicked.
    #[error("receive loop panicked")]
    LoopPanicked,

    /// Dialing the peer failed.
    #[error("connect to {address} failed: {reason}")]
    Connect {
        /// Peer address.
        address: std::net::SocketAddr,
        /// Failure description.
        reason: String,
    },

    /// Frame codec error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ferry_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Returns true if the failure is an integrity violation rather than a
    /// transient infrastructure problem.
    pub fn is_integrity(&self) -> bool {
        matches!(self, TransferError::SizeMismatch { .. })
    }

    /// Returns true if the peer broke the wire protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            TransferError::Protocol(_)
                | TransferError::UnexpectedFrame(_)
                | TransferError::NoReceiveTarget
                | TransferError::InvalidFileName(_)
        )
    }
}

/// A specialized Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
