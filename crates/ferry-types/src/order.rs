//! Chain records consumed by the tracker.
//!
//! These are read-only views of on-chain state; the gateway never owns
//! them, it only decides what to do next based on their contents.

use crate::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A shard index credited to the miner that reported receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteInfo {
    /// Shard index, starting at 1.
    pub index: u8,
    /// Miner account credited with the batch.
    pub miner: AccountId,
}

impl CompleteInfo {
    /// Creates a completion entry.
    pub fn new(index: u8, miner: AccountId) -> Self {
        Self { index, miner }
    }
}

/// A pending storage order for one root hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOrder {
    /// Account that placed the order.
    pub owner: Option<AccountId>,
    /// Batches already reported as received.
    pub complete_list: Vec<CompleteInfo>,
    /// Shard index to responsible miner, when the chain assigns them.
    pub assigned_miners: BTreeMap<u8, AccountId>,
    /// Number of times the order has been re-assigned.
    pub count: u8,
}

impl StorageOrder {
    /// Shard indices already reported complete.
    pub fn completed_indices(&self) -> BTreeSet<u8> {
        self.complete_list.iter().map(|c| c.index).collect()
    }

    /// Returns true if `index` has been reported complete.
    pub fn is_complete(&self, index: u8) -> bool {
        self.complete_list.iter().any(|c| c.index == index)
    }
}

/// One owner of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerInfo {
    /// Owning account.
    pub user: AccountId,
    /// File name under this owner.
    pub file_name: String,
    /// Bucket under this owner.
    pub bucket: String,
}

/// Metadata of a file the chain reports as fully stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Size of the stored file.
    pub file_size: u64,
    /// Every account that declared ownership.
    pub owners: Vec<OwnerInfo>,
}

impl FileMetadata {
    /// Returns true if the raw public key is among the owners.
    pub fn has_owner(&self, owner: &[u8]) -> bool {
        self.owners.iter().any(|o| o.user.as_bytes().as_slice() == owner)
    }
}

/// Structured status report a storage peer sends about a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStoreInfo {
    /// Root hash the report is about.
    pub file_id: String,
    /// Declared file size.
    pub file_size: u64,
    /// Free-form state label.
    pub file_state: String,
    /// Upload phase finished.
    pub is_upload: bool,
    /// Integrity check finished.
    pub is_check: bool,
    /// Sharding finished.
    pub is_shard: bool,
    /// Handed to the scheduler.
    pub is_scheduler: bool,
    /// Shard index to miner address.
    #[serde(default)]
    pub miners: BTreeMap<u8, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_indices() {
        let miner = AccountId::from_bytes([3u8; 32]);
        let order = StorageOrder {
            complete_list: vec![CompleteInfo::new(2, miner), CompleteInfo::new(5, miner)],
            ..Default::default()
        };
        assert!(order.is_complete(2));
        assert!(!order.is_complete(1));
        assert_eq!(order.completed_indices().into_iter().collect::<Vec<_>>(), vec![2, 5]);
    }

    #[test]
    fn test_metadata_has_owner() {
        let alice = AccountId::from_bytes([1u8; 32]);
        let meta = FileMetadata {
            file_size: 10,
            owners: vec![OwnerInfo {
                user: alice,
                file_name: "a.txt".into(),
                bucket: "b".into(),
            }],
        };
        assert!(meta.has_owner(&[1u8; 32]));
        assert!(!meta.has_owner(&[2u8; 32]));
    }

    #[test]
    fn test_file_store_info_json() {
        let info: FileStoreInfo =
            serde_json::from_str(r#"{"fileId":"x","fileSize":5,"fileState":"pending","isUpload":true,"isCheck":false,"isShard":false,"isScheduler":false}"#)
                .unwrap();
        assert_eq!(info.file_id, "x");
        assert!(info.is_upload);
        assert!(info.miners.is_empty());
    }
}
