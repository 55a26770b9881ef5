//! A minimal storage peer for local runs.
//!
//! Accepts connections and lets each connection's receive loop write
//! pushed fragments into one directory.

use std::net::SocketAddr;

use ferry_transfer::{ConnManager, Session};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Serves write handshakes on `listener` until `shutdown` fires.
pub async fn serve(listener: TcpListener, session: Session, shutdown: CancellationToken) -> std::io::Result<()> {
    let local: SocketAddr = listener.local_addr()?;
    info!(listen = %local, dir = %session.dir.display(), "storage peer listening");
    let mut connections = JoinSet::new();

    loop {
        while connections.try_join_next().is_some() {}
        let (stream, remote) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(remote = %remote, error = %e, "failed to set nodelay");
        }
        let session = session.clone();
        connections.spawn(async move {
            debug!(remote = %remote, "connection opened");
            match ConnManager::open(stream, session).join().await {
                Ok(()) => debug!(remote = %remote, "connection closed"),
                Err(e) => warn!(remote = %remote, error = %e, "connection failed"),
            }
        });
    }

    connections.shutdown().await;
    info!(listen = %local, "storage peer stopped");
    Ok(())
}
