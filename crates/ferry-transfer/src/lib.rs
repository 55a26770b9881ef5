//! # Ferry Transfer
//!
//! Connection management for fragment transfers between the gateway and
//! storage peers.
//!
//! A [`ConnManager`] owns one connection. It spawns a receive loop that
//! demultiplexes inbound frames and exposes request/acknowledge handshakes
//! on top of it:
//!
//! - [`ConnManager::send_file`] pushes one or more files to the peer,
//! - [`ConnManager::receive_file`] pulls a file from the peer,
//! - [`ConnManager::send_file_status`] asks the peer for a status report.
//!
//! Each handshake step waits on a single-slot rendezvous with a bounded
//! timeout. When the loop exits the rendezvous closes and every waiter
//! unblocks.
//!
//! [`TcpTransport`] implements the [`FragmentTransport`] seam the
//! distribution engine uses to reach peers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod conn;
mod error;
mod notify;
mod receiver;
mod transport;

pub use cache::{MemoryCache, StatusCache};
pub use config::TransferConfig;
pub use conn::{ConnManager, Credentials, Session};
pub use error::{Result, TransferError};
pub use notify::{notify_channel, NotifyWaiter, Notifier};
pub use transport::{FragmentTransport, TcpTransport};
