//! Property tests for job ledger persistence.

use ferry_tracker::JobLedger;
use ferry_types::{JobRecord, Segment};
use proptest::prelude::*;

fn segment_strategy(width: usize) -> impl Strategy<Value = Segment> {
    (
        "[0-9a-f]{8,64}",
        prop::collection::vec("[0-9a-f]{8,64}", width..=width),
    )
        .prop_map(|(segment, fragments)| {
            Segment::new(
                format!("/var/ferry/file/{segment}"),
                fragments.into_iter().map(|f| format!("/var/ferry/file/{f}")).collect(),
            )
        })
}

fn record_strategy() -> impl Strategy<Value = JobRecord> {
    (1usize..13)
        .prop_flat_map(|width| {
            (
                "[0-9a-f]{64}",
                prop::collection::vec(any::<u8>(), 32..=32),
                "[a-zA-Z0-9 ._-]{1,40}",
                "[a-z0-9-]{3,20}",
                any::<u64>(),
                prop::collection::vec(segment_strategy(width), 0..4),
                any::<bool>(),
                any::<u8>(),
                any::<bool>(),
            )
        })
        .prop_map(
            |(root, owner, name, bucket, size, segments, put_flag, count, duplicate)| {
                let mut record = JobRecord::new(root, owner, name, bucket, size, segments);
                record.put_flag = put_flag;
                record.count = count;
                record.duplicate = duplicate;
                record
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: a stored record loads back unchanged under its root hash.
    #[test]
    fn prop_record_survives_ledger(record in record_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::open(dir.path()).unwrap();

        ledger.store(&record).unwrap();
        let loaded = ledger.load(&record.root_hash).unwrap();

        prop_assert!(loaded.matches_key(&record.root_hash));
        prop_assert_eq!(loaded, record.clone());
        prop_assert_eq!(ledger.list().unwrap(), vec![record.root_hash]);
    }

    /// Property: rewriting a record replaces it, leaving one entry.
    #[test]
    fn prop_rewrite_replaces(record in record_strategy(), count in any::<u8>()) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::open(dir.path()).unwrap();

        ledger.store(&record).unwrap();
        let mut updated = record.clone();
        updated.count = count;
        updated.put_flag = !record.put_flag;
        ledger.store(&updated).unwrap();

        prop_assert_eq!(ledger.load(&record.root_hash).unwrap(), updated);
        prop_assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
