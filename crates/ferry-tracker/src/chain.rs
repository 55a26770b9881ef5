//! The chain collaborator.
//!
//! Queries return `Ok(None)` when the chain has no entry; that sentinel is
//! part of normal control flow. Only transport and transaction failures
//! surface as [`ChainError`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use ferry_types::{
    AccountId, CompleteInfo, FileMetadata, JobRecord, OwnerInfo, PeerId, Segment, StorageOrder,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::ChainError;

/// A storage order submission.
///
/// A request without segments declares an additional owner of content the
/// chain already stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// File root hash.
    pub root_hash: String,
    /// Segment descriptors; empty for an owner declaration.
    pub segments: Vec<Segment>,
    /// Owner public key.
    pub owner: Vec<u8>,
    /// File name under the owner.
    pub file_name: String,
    /// Bucket under the owner.
    pub bucket: String,
    /// Declared file size.
    pub file_size: u64,
}

impl OrderRequest {
    /// A full storage order for `record`.
    pub fn for_record(record: &JobRecord) -> Self {
        Self {
            root_hash: record.root_hash.clone(),
            segments: record.segments.clone(),
            owner: record.owner.clone(),
            file_name: record.file_name.clone(),
            bucket: record.bucket.clone(),
            file_size: record.file_size,
        }
    }

    /// An owner declaration for content already stored.
    pub fn declaration(record: &JobRecord) -> Self {
        Self {
            segments: Vec::new(),
            ..Self::for_record(record)
        }
    }

    /// Returns true if this only declares an owner.
    pub fn is_declaration(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Chain queries and submissions the tracker depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Metadata of a fully stored file.
    async fn query_file_metadata(&self, root_hash: &str) -> Result<Option<FileMetadata>, ChainError>;

    /// The pending storage order for a file.
    async fn query_storage_order(&self, root_hash: &str) -> Result<Option<StorageOrder>, ChainError>;

    /// Accounts `owner` has authorized to use its space.
    async fn query_authority_list(&self, owner: &[u8]) -> Result<Option<Vec<AccountId>>, ChainError>;

    /// Submits a storage order and returns the transaction hash.
    async fn generate_storage_order(&self, request: &OrderRequest) -> Result<String, ChainError>;

    /// The transfer peer registered for a miner account.
    async fn query_miner_peer(&self, miner: &AccountId) -> Result<Option<PeerId>, ChainError>;

    /// The account this gateway signs with.
    fn signature_account(&self) -> AccountId;
}

#[derive(Default)]
struct ChainState {
    files: HashMap<String, FileMetadata>,
    orders: HashMap<String, StorageOrder>,
    authorities: HashMap<Vec<u8>, Vec<AccountId>>,
    miners: HashMap<AccountId, PeerId>,
    submitted: Vec<OrderRequest>,
    unavailable: bool,
    open_authority: bool,
}

/// In-memory [`ChainClient`] for local runs and tests.
pub struct MemoryChain {
    account: AccountId,
    state: Mutex<ChainState>,
    queries: AtomicU64,
    nonce: AtomicU64,
}

impl MemoryChain {
    /// Creates an empty chain where the gateway signs as `account`.
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            state: Mutex::new(ChainState::default()),
            queries: AtomicU64::new(0),
            nonce: AtomicU64::new(0),
        }
    }

    /// Marks `root_hash` as fully stored.
    pub fn set_stored(&self, root_hash: &str, metadata: FileMetadata) {
        let mut state = self.state.lock();
        state.orders.remove(root_hash);
        state.files.insert(root_hash.to_string(), metadata);
    }

    /// Installs a pending order.
    pub fn set_order(&self, root_hash: &str, order: StorageOrder) {
        self.state.lock().orders.insert(root_hash.to_string(), order);
    }

    /// Drops a pending order.
    pub fn remove_order(&self, root_hash: &str) -> Option<StorageOrder> {
        self.state.lock().orders.remove(root_hash)
    }

    /// Lets `owner` authorize `account`.
    pub fn authorize(&self, owner: &[u8], account: AccountId) {
        let mut state = self.state.lock();
        let list = state.authorities.entry(owner.to_vec()).or_default();
        if !list.contains(&account) {
            list.push(account);
        }
    }

    /// Revokes every authorization `owner` granted.
    pub fn revoke(&self, owner: &[u8]) {
        self.state.lock().authorities.remove(owner);
    }

    /// Registers the transfer peer of a miner.
    pub fn register_miner(&self, miner: AccountId, peer: PeerId) {
        self.state.lock().miners.insert(miner, peer);
    }

    /// Credits `miner` with shard `index` of `root_hash`.
    pub fn report_complete(&self, root_hash: &str, index: u8, miner: AccountId) {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.get_mut(root_hash) {
            if !order.is_complete(index) {
                order.complete_list.push(CompleteInfo::new(index, miner));
            }
        }
    }

    /// When set, every owner authorizes the gateway account.
    pub fn set_open_authority(&self, open: bool) {
        self.state.lock().open_authority = open;
    }

    /// Makes every call fail as if the endpoint were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Every order submitted so far.
    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.state.lock().submitted.clone()
    }

    /// Number of queries served.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<parking_lot::MutexGuard<'_, ChainState>, ChainError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let state = self.state.lock();
        if state.unavailable {
            return Err(ChainError::Unavailable("memory chain offline".into()));
        }
        Ok(state)
    }

    fn tx_hash(&self, request: &OrderRequest) -> String {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(request.root_hash.as_bytes());
        hasher.update(&request.owner);
        hasher.update(nonce.to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn query_file_metadata(&self, root_hash: &str) -> Result<Option<FileMetadata>, ChainError> {
        Ok(self.check()?.files.get(root_hash).cloned())
    }

    async fn query_storage_order(&self, root_hash: &str) -> Result<Option<StorageOrder>, ChainError> {
        Ok(self.check()?.orders.get(root_hash).cloned())
    }

    async fn query_authority_list(&self, owner: &[u8]) -> Result<Option<Vec<AccountId>>, ChainError> {
        let state = self.check()?;
        if state.open_authority {
            return Ok(Some(vec![self.account]));
        }
        Ok(state.authorities.get(owner).cloned())
    }

    async fn generate_storage_order(&self, request: &OrderRequest) -> Result<String, ChainError> {
        let tx = self.tx_hash(request);
        let mut state = self.check()?;
        let owner = AccountId::from_slice(&request.owner)
            .map_err(|e| ChainError::Rejected(format!("bad owner key: {e}")))?;

        if request.is_declaration() {
            let Some(meta) = state.files.get_mut(&request.root_hash) else {
                return Err(ChainError::Rejected(format!(
                    "{} is not stored, cannot declare owner",
                    request.root_hash
                )));
            };
            if !meta.has_owner(&request.owner) {
                meta.owners.push(OwnerInfo {
                    user: owner,
                    file_name: request.file_name.clone(),
                    bucket: request.bucket.clone(),
                });
            }
        } else {
            if state.files.contains_key(&request.root_hash) {
                return Err(ChainError::Rejected(format!("{} is already stored", request.root_hash)));
            }
            state
                .orders
                .entry(request.root_hash.clone())
                .or_insert_with(|| StorageOrder {
                    owner: Some(owner),
                    ..StorageOrder::default()
                });
        }
        state.submitted.push(request.clone());
        Ok(tx)
    }

    async fn query_miner_peer(&self, miner: &AccountId) -> Result<Option<PeerId>, ChainError> {
        Ok(self.check()?.miners.get(miner).copied())
    }

    fn signature_account(&self) -> AccountId {
        self.account
    }
}
