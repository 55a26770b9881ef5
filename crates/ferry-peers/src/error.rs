//! Peer selection error types.

use thiserror::Error;

/// Errors that can occur while selecting peers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerError {
    /// The directory has no peers to offer.
    #[error("no storage peers available")]
    NoPeers,
}

/// A specialized Result type for peer operations.
pub type Result<T> = std::result::Result<T, PeerError>;
