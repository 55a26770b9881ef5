//! Common types used throughout `ferry`.
//!
//! This crate provides the data model shared by the transfer protocol,
//! the distribution engine and the job tracker: persisted job records,
//! sharded segment descriptors, and the chain records the tracker reads.

mod identity;
mod order;
mod peer;
mod record;

pub use identity::{AccountId, IdError, PeerId};
pub use order::{CompleteInfo, FileMetadata, FileStoreInfo, OwnerInfo, StorageOrder};
pub use peer::PeerInfo;
pub use record::{JobRecord, Segment, MIN_RECORD_LEN};

/// Number of data shards produced per segment by default.
pub const DATA_SHARDS: usize = 4;

/// Number of parity shards produced per segment by default.
pub const PARITY_SHARDS: usize = 8;

/// Default shard width (fragments per segment).
pub const SHARD_WIDTH: usize = DATA_SHARDS + PARITY_SHARDS;
