//! Single-slot handshake rendezvous.
//!
//! The receive loop holds the [`Notifier`]; the handshake caller holds the
//! [`NotifyWaiter`]. At most one status is buffered. Delivery never blocks
//! the loop: a status that arrives while the slot is still full is dropped.
//! Dropping the notifier closes the rendezvous and wakes the waiter.

use ferry_protocol::Status;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{Result, TransferError};

/// Creates a connected notifier/waiter pair.
pub fn notify_channel() -> (Notifier, NotifyWaiter) {
    let (tx, rx) = mpsc::channel(1);
    (Notifier { tx }, NotifyWaiter { rx })
}

/// Delivering side of the rendezvous.
#[derive(Debug)]
pub struct Notifier {
    tx: mpsc::Sender<Status>,
}

impl Notifier {
    /// Hands `status` to the waiter without blocking.
    ///
    /// Returns false if the slot was full or the waiter is gone.
    pub fn deliver(&self, status: Status) -> bool {
        match self.tx.try_send(status) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(?dropped, "notify slot full, dropping status");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Waiting side of the rendezvous.
#[derive(Debug)]
pub struct NotifyWaiter {
    rx: mpsc::Receiver<Status>,
}

impl NotifyWaiter {
    /// Waits up to `timeout` for the acknowledgement of `step`.
    ///
    /// A timeout ends the step; it is not retried within the same session.
    pub async fn wait(&mut self, step: &'static str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Err(TransferError::Timeout { step, timeout }),
            Ok(None) => Err(TransferError::Closed(step)),
            Ok(Some(status)) if status.is_ok() => Ok(()),
            Ok(Some(_)) => Err(TransferError::Rejected(step)),
        }
    }
}
