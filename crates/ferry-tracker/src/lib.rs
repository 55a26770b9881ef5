//! # Ferry Tracker
//!
//! Keeps accepted files moving until the chain confirms their storage.
//!
//! - [`JobLedger`] persists one record per file root hash and survives
//!   crashes.
//! - [`transition`] is the pure per-job state machine.
//! - [`DistributionEngine`] places fragment batches onto storage peers.
//! - [`Tracker`] polls the ledger and runs one supervised worker per open
//!   job, up to a concurrency ceiling.
//!
//! The chain and the sharder are collaborators reached through the
//! [`ChainClient`] and [`Sharder`] traits. [`MemoryChain`] backs local
//! runs and tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod chain;
mod engine;
mod error;
mod ledger;
mod retry;
mod shard;
mod state;
mod tracker;

pub use chain::{ChainClient, MemoryChain, OrderRequest};
pub use engine::{group_by_index, DistributionConfig, DistributionEngine, DistributionReport};
pub use error::{ChainError, Disposition, LedgerError, Result, ShardError, TrackerError};
pub use ledger::JobLedger;
pub use retry::RetryPolicy;
pub use shard::{ShardOutput, Sharder};
pub use state::{transition, Action, ChainView, JobState};
pub use tracker::{Acceptance, InFlight, InFlightGuard, Outcome, Tracker, TrackerConfig};
