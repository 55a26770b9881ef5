//! Fuzz target for persisted job record parsing.
//!
//! Tests that arbitrary track-file contents never panic the parser and
//! that accepted records survive a serialize/deserialize cycle.

#![no_main]

use ferry_types::JobRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(record) = serde_json::from_slice::<JobRecord>(data) else {
        return;
    };

    let _ = record.shard_width();
    let _ = record.fragment_dir();
    let _ = record.matches_key(&record.root_hash);

    let bytes = serde_json::to_vec(&record).expect("parsed record serializes");
    let again: JobRecord = serde_json::from_slice(&bytes).expect("serialized record parses");
    assert_eq!(again, record);
});
