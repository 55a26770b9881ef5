//! Storage peer descriptors.

use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// A storage peer the gateway can push fragments to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    /// The peer's identifier.
    pub id: PeerId,
    /// Address the peer accepts transfers on.
    pub address: SocketAddr,
}

impl PeerInfo {
    /// Creates a peer descriptor.
    #[must_use]
    pub fn new(id: PeerId, address: SocketAddr) -> Self {
        Self { id, address }
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_info_from_config_json() {
        let json = format!(r#"{{"id":"{}","address":"127.0.0.1:4001"}}"#, "ab".repeat(32));
        let peer: PeerInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(peer.id.as_bytes(), &[0xab; 32]);
        assert_eq!(peer.address.port(), 4001);
        assert_eq!(peer.to_string(), "abababababababab@127.0.0.1:4001");
    }
}
