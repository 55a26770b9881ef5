//! The sharding collaborator.

use std::path::Path;

use async_trait::async_trait;
use ferry_types::Segment;

use crate::ShardError;

/// Result of sharding one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardOutput {
    /// Segment and fragment descriptors.
    pub segments: Vec<Segment>,
    /// Content root hash of the whole file.
    pub root_hash: String,
}

/// Splits and erasure-codes a file into segments and fragments.
#[async_trait]
pub trait Sharder: Send + Sync {
    /// Shards the file at `path`, optionally encrypting with `cipher`.
    async fn shard_file(&self, path: &Path, cipher: Option<&str>) -> Result<ShardOutput, ShardError>;
}
