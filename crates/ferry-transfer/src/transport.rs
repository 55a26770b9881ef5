//! The seam between the distribution engine and the network.

use std::path::Path;

use async_trait::async_trait;
use ferry_types::PeerInfo;
use tokio::net::TcpStream;
use tracing::debug;

use crate::{ConnManager, Credentials, Result, Session, TransferError};

/// Moves fragments to storage peers.
#[async_trait]
pub trait FragmentTransport: Send + Sync {
    /// Checks that `peer` is reachable.
    async fn connect(&self, peer: &PeerInfo) -> Result<()>;

    /// Runs one write handshake pushing `fragment` to `peer`.
    async fn write_fragment(&self, peer: &PeerInfo, root_hash: &str, fragment: &Path) -> Result<()>;
}

/// [`FragmentTransport`] over plain TCP, one connection per fragment.
#[derive(Clone)]
pub struct TcpTransport {
    session: Session,
    credentials: Credentials,
}

impl TcpTransport {
    /// Creates a transport sharing `session`'s pools and timeouts.
    pub fn new(session: Session, credentials: Credentials) -> Self {
        Self {
            session,
            credentials,
        }
    }

    async fn dial(&self, peer: &PeerInfo) -> Result<TcpStream> {
        let timeout = self.session.config.connect_timeout;
        let stream = tokio::time::timeout(timeout, TcpStream::connect(peer.address))
            .await
            .map_err(|_| TransferError::Connect {
                address: peer.address,
                reason: format!("timed out after {timeout:?}"),
            })?
            .map_err(|e| TransferError::Connect {
                address: peer.address,
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl FragmentTransport for TcpTransport {
    async fn connect(&self, peer: &PeerInfo) -> Result<()> {
        self.dial(peer).await?;
        debug!(peer = %peer, "peer reachable");
        Ok(())
    }

    async fn write_fragment(&self, peer: &PeerInfo, root_hash: &str, fragment: &Path) -> Result<()> {
        let name = fragment
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidFileName(fragment.display().to_string()))?
            .to_string();
        let dir = fragment.parent().unwrap_or_else(|| Path::new("."));
        let size = tokio::fs::metadata(fragment).await?.len();

        let stream = self.dial(peer).await?;
        let session = self.session.clone().with_dir(dir);
        ConnManager::open(stream, session)
            .send_file(&[name], root_hash, size, &self.credentials)
            .await
    }
}
