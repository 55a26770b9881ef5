//! The per-job state machine.
//!
//! [`transition`] is pure: it looks at a job record and what the chain
//! currently says about it, and decides the next action together with the
//! record the tracker should persist. All I/O lives in the tracker.

use ferry_types::{AccountId, FileMetadata, JobRecord, StorageOrder};

/// What the chain reports about one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainView {
    /// File metadata; present once the file is fully stored.
    pub metadata: Option<FileMetadata>,
    /// Pending storage order.
    pub order: Option<StorageOrder>,
    /// Whether the owner authorizes this gateway; `None` until queried.
    pub authorized: Option<bool>,
}

impl ChainView {
    /// A view from the two per-pass queries.
    pub fn new(metadata: Option<FileMetadata>, order: Option<StorageOrder>) -> Self {
        Self {
            metadata,
            order,
            authorized: None,
        }
    }

    /// Records the outcome of the authority list query.
    pub fn with_authority(mut self, accounts: Option<&[AccountId]>, gateway: &AccountId) -> Self {
        self.authorized = Some(accounts.is_some_and(|list| list.contains(gateway)));
        self
    }
}

/// Where a job stands on the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Fully stored.
    AlreadyStored,
    /// No storage order yet.
    NeedOrder,
    /// A storage order is pending.
    HasOrder,
    /// The content belongs to another job's order.
    Duplicate,
}

impl JobState {
    /// Classifies a job.
    pub fn of(record: &JobRecord, view: &ChainView) -> Self {
        if view.metadata.is_some() {
            JobState::AlreadyStored
        } else if record.duplicate {
            JobState::Duplicate
        } else if view.order.is_some() {
            JobState::HasOrder
        } else {
            JobState::NeedOrder
        }
    }
}

/// The next step the tracker takes for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Storage confirmed: delete local artifacts and the record.
    Cleanup,
    /// The record contradicts its key: delete it.
    Corrupt {
        /// What is wrong.
        reason: String,
    },
    /// Content is stored: declare this job's owner and delete the record.
    DeclareOwner,
    /// The primary order vanished: persist the record as a primary job.
    PromoteToPrimary,
    /// Another job's order is still pending: nothing to do this pass.
    AwaitPrimary,
    /// Persist the reset record, then query the owner's authority list.
    CheckAuthorization,
    /// The owner revoked this gateway: delete artifacts and the record.
    Deauthorized,
    /// Submit a storage order, then query it again.
    GenerateOrder,
    /// Segment descriptors are gone: shard the retained file again.
    Reshard,
    /// Push fragments against the pending order.
    Distribute,
}

impl Action {
    /// Returns true if the action ends the job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Action::Cleanup | Action::Corrupt { .. } | Action::DeclareOwner | Action::Deauthorized
        )
    }
}

/// Decides the next action for the job stored under `key`.
pub fn transition(key: &str, record: &JobRecord, view: &ChainView) -> (JobRecord, Action) {
    let mut next = record.clone();

    if !record.matches_key(key) {
        let reason = format!("recorded root hash {:?} does not match", record.root_hash);
        return (next, Action::Corrupt { reason });
    }

    match JobState::of(record, view) {
        JobState::AlreadyStored => {
            let listed = view
                .metadata
                .as_ref()
                .is_some_and(|meta| meta.has_owner(&record.owner));
            if record.duplicate && !listed {
                (next, Action::DeclareOwner)
            } else {
                (next, Action::Cleanup)
            }
        }
        JobState::Duplicate if view.order.is_some() => (next, Action::AwaitPrimary),
        JobState::Duplicate => {
            next.duplicate = false;
            next.put_flag = false;
            (next, Action::PromoteToPrimary)
        }
        JobState::NeedOrder => {
            next.put_flag = false;
            next.count = 0;
            let action = match view.authorized {
                None => Action::CheckAuthorization,
                Some(false) => Action::Deauthorized,
                Some(true) if record.segments.is_empty() => Action::Reshard,
                Some(true) => Action::GenerateOrder,
            };
            (next, action)
        }
        JobState::HasOrder if record.segments.is_empty() => (next, Action::Reshard),
        JobState::HasOrder => (next, Action::Distribute),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_types::{OwnerInfo, Segment};

    fn account(n: u8) -> AccountId {
        AccountId::from_bytes([n; 32])
    }

    fn record() -> JobRecord {
        JobRecord::new(
            "root",
            vec![1; 32],
            "a.bin",
            "bkt",
            100,
            vec![Segment::new("/w/root/s0", vec!["/w/root/f0".into(), "/w/root/f1".into()])],
        )
    }

    fn stored(owner: u8) -> FileMetadata {
        FileMetadata {
            file_size: 100,
            owners: vec![OwnerInfo {
                user: account(owner),
                file_name: "a.bin".into(),
                bucket: "bkt".into(),
            }],
        }
    }

    #[test]
    fn test_stored_is_cleanup() {
        let view = ChainView::new(Some(stored(1)), None);
        let (next, action) = transition("root", &record(), &view);
        assert_eq!(action, Action::Cleanup);
        assert!(action.is_terminal());
        assert_eq!(next, record());
    }

    #[test]
    fn test_key_mismatch_is_corrupt() {
        let view = ChainView::new(Some(stored(1)), None);
        let (_, action) = transition("other", &record(), &view);
        assert!(matches!(action, Action::Corrupt { .. }));
    }

    #[test]
    fn test_duplicate_stored_declares_unlisted_owner() {
        let dup = record().into_duplicate();
        let (_, action) = transition("root", &dup, &ChainView::new(Some(stored(2)), None));
        assert_eq!(action, Action::DeclareOwner);

        let (_, action) = transition("root", &dup, &ChainView::new(Some(stored(1)), None));
        assert_eq!(action, Action::Cleanup);
    }

    #[test]
    fn test_duplicate_waits_on_primary_order() {
        let dup = record().into_duplicate();
        let view = ChainView::new(None, Some(StorageOrder::default()));
        let (next, action) = transition("root", &dup, &view);
        assert_eq!(action, Action::AwaitPrimary);
        assert!(next.duplicate);
    }

    #[test]
    fn test_duplicate_without_order_is_promoted() {
        let mut dup = record().into_duplicate();
        dup.put_flag = true;
        let (next, action) = transition("root", &dup, &ChainView::default());
        assert_eq!(action, Action::PromoteToPrimary);
        assert!(!next.duplicate);
        assert!(!next.put_flag);
        assert!(!action.is_terminal());
    }

    #[test]
    fn test_missing_order_checks_authorization_first() {
        let mut rec = record();
        rec.put_flag = true;
        rec.count = 7;

        let (next, action) = transition("root", &rec, &ChainView::default());
        assert_eq!(action, Action::CheckAuthorization);
        assert!(!next.put_flag);
        assert_eq!(next.count, 0);

        let gateway = account(9);
        let view = ChainView::default().with_authority(Some(&[account(3), gateway]), &gateway);
        assert_eq!(transition("root", &rec, &view).1, Action::GenerateOrder);

        let view = ChainView::default().with_authority(Some(&[account(3)]), &gateway);
        assert_eq!(transition("root", &rec, &view).1, Action::Deauthorized);

        let view = ChainView::default().with_authority(None, &gateway);
        assert_eq!(transition("root", &rec, &view).1, Action::Deauthorized);
    }

    #[test]
    fn test_order_needs_segments() {
        let mut bare = record();
        bare.segments.clear();
        let gateway = account(9);
        let view = ChainView::default().with_authority(Some(&[gateway]), &gateway);
        assert_eq!(transition("root", &bare, &view).1, Action::Reshard);
    }

    #[test]
    fn test_pending_order_distributes() {
        let view = ChainView::new(None, Some(StorageOrder::default()));
        assert_eq!(transition("root", &record(), &view).1, Action::Distribute);

        let mut bare = record();
        bare.segments.clear();
        assert_eq!(transition("root", &bare, &view).1, Action::Reshard);
    }

    #[test]
    fn test_states() {
        let rec = record();
        assert_eq!(JobState::of(&rec, &ChainView::default()), JobState::NeedOrder);
        assert_eq!(
            JobState::of(&rec, &ChainView::new(None, Some(StorageOrder::default()))),
            JobState::HasOrder
        );
        assert_eq!(
            JobState::of(&rec, &ChainView::new(Some(stored(1)), None)),
            JobState::AlreadyStored
        );
        assert_eq!(
            JobState::of(&rec.clone().into_duplicate(), &ChainView::default()),
            JobState::Duplicate
        );
    }
}
