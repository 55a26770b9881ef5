//! Persisted job records.
//!
//! A job record is written once per accepted file, keyed by the file's
//! root hash, and carries everything the tracker needs to resume
//! distribution after a restart. Field names follow the track-file JSON
//! layout used by earlier gateway releases so existing ledgers keep loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Length of the smallest well-formed serialised record.
///
/// Anything shorter was truncated mid-write and is treated as corrupt.
pub const MIN_RECORD_LEN: usize = 128;

/// One slice of the original file and its erasure-coded fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Local path of the segment; its file name is the segment content hash.
    #[serde(rename = "SegmentHash")]
    pub segment_hash: String,
    /// Local paths of the fragments, data shards first then parity shards.
    /// Each file name is the fragment hash.
    #[serde(rename = "FragmentHash")]
    pub fragment_hashes: Vec<String>,
}

impl Segment {
    /// Creates a segment descriptor.
    pub fn new(segment_hash: impl Into<String>, fragment_hashes: Vec<String>) -> Self {
        Self {
            segment_hash: segment_hash.into(),
            fragment_hashes,
        }
    }

    /// Number of fragments in this segment.
    pub fn width(&self) -> usize {
        self.fragment_hashes.len()
    }

    /// Local path of the fragment at `index` (zero based).
    pub fn fragment_path(&self, index: usize) -> Option<&Path> {
        self.fragment_hashes.get(index).map(Path::new)
    }
}

/// A persisted distribution job, one per file root hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Segment descriptors; empty when only the raw file survived.
    #[serde(rename = "segmentInfo", default, deserialize_with = "null_as_empty")]
    pub segments: Vec<Segment>,
    /// Owner public key.
    #[serde(with = "base64_bytes", default)]
    pub owner: Vec<u8>,
    /// Root hash; must equal the ledger key.
    #[serde(rename = "roothash")]
    pub root_hash: String,
    /// Display file name.
    #[serde(rename = "filename")]
    pub file_name: String,
    /// Bucket the file was uploaded into.
    #[serde(rename = "buckname")]
    pub bucket: String,
    /// Declared size of the original file.
    #[serde(rename = "filesize")]
    pub file_size: u64,
    /// Fragments have been pushed to peers at least once.
    #[serde(rename = "putflag")]
    pub put_flag: bool,
    /// Number of distribution passes attempted.
    pub count: u8,
    /// Content is already stored under another job.
    pub duplicate: bool,
}

impl JobRecord {
    /// Creates a fresh primary job.
    pub fn new(
        root_hash: impl Into<String>,
        owner: Vec<u8>,
        file_name: impl Into<String>,
        bucket: impl Into<String>,
        file_size: u64,
        segments: Vec<Segment>,
    ) -> Self {
        Self {
            segments,
            owner,
            root_hash: root_hash.into(),
            file_name: file_name.into(),
            bucket: bucket.into(),
            file_size,
            put_flag: false,
            count: 0,
            duplicate: false,
        }
    }

    /// Marks this job as a duplicate of content stored by another job.
    pub fn into_duplicate(mut self) -> Self {
        self.duplicate = true;
        self
    }

    /// Returns true if the record's root hash matches the ledger key.
    pub fn matches_key(&self, key: &str) -> bool {
        self.root_hash == key
    }

    /// Returns the shard width shared by every segment.
    ///
    /// `None` when there are no segments or the widths disagree.
    pub fn shard_width(&self) -> Option<usize> {
        let first = self.segments.first()?.width();
        if first == 0 || self.segments.iter().any(|s| s.width() != first) {
            return None;
        }
        Some(first)
    }

    /// Directory holding this job's segments and fragments.
    pub fn fragment_dir(&self) -> Option<PathBuf> {
        self.segments
            .first()
            .and_then(|s| Path::new(&s.segment_hash).parent())
            .map(Path::to_path_buf)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Segment>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Segment>>::deserialize(deserializer)?.unwrap_or_default())
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
