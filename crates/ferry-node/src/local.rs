//! Sharding backend for local runs.
//!
//! Splits a file into fixed-size segments, cuts each segment into
//! `data_shards` equal chunks and adds `parity_shards` XOR parity chunks.
//! The parity is replicated, not a real erasure code; it only exists so
//! local runs move realistically shaped batches.

use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ferry_tracker::{ShardError, ShardOutput, Sharder};
use ferry_types::Segment;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Default segment size.
pub const SEGMENT_SIZE: usize = 1024 * 1024;

/// [`Sharder`] writing fragments under `<fragment_dir>/<root_hash>/`.
#[derive(Debug, Clone)]
pub struct LocalSharder {
    fragment_dir: PathBuf,
    data_shards: usize,
    parity_shards: usize,
    segment_size: usize,
}

impl LocalSharder {
    /// Creates a sharder.
    pub fn new(fragment_dir: impl Into<PathBuf>, data_shards: usize, parity_shards: usize) -> Self {
        Self {
            fragment_dir: fragment_dir.into(),
            data_shards: data_shards.max(1),
            parity_shards,
            segment_size: SEGMENT_SIZE,
        }
    }

    /// Uses `segment_size`-byte segments.
    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size.max(self.data_shards);
        self
    }

    fn shard_blocking(&self, path: &Path) -> Result<ShardOutput, ShardError> {
        fs::create_dir_all(&self.fragment_dir)?;
        let staging = self
            .fragment_dir
            .join(format!(".staging-{}", uuid::Uuid::new_v4()));
        fs::create_dir(&staging)?;

        let result = self.write_segments(path, &staging);
        let (names, root_hash) = match result {
            Ok(done) => done,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        let target = self.fragment_dir.join(&root_hash);
        match fs::rename(&staging, &target) {
            Ok(()) => {}
            // Same content sharded before.
            Err(e) if target.is_dir() => {
                debug!(root_hash = %root_hash, error = %e, "fragments already present");
                fs::remove_dir_all(&staging)?;
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e.into());
            }
        }

        let at = |name: &String| target.join(name).display().to_string();
        let segments = names
            .iter()
            .map(|(segment, fragments)| Segment::new(at(segment), fragments.iter().map(at).collect()))
            .collect();
        Ok(ShardOutput {
            segments,
            root_hash,
        })
    }

    /// Writes every segment and fragment into `dir`; returns their names
    /// and the root hash.
    fn write_segments(&self, path: &Path, dir: &Path) -> Result<(Vec<(String, Vec<String>)>, String), ShardError> {
        let mut file = File::open(path)?;
        let mut root = Sha256::new();
        let mut names = Vec::new();
        let mut buf = vec![0u8; self.segment_size];

        loop {
            let n = read_full(&mut file, &mut buf)?;
            if n == 0 && !names.is_empty() {
                break;
            }
            let segment = &buf[..n];
            let segment_hash = hex::encode(Sha256::digest(segment));
            fs::write(dir.join(&segment_hash), segment)?;
            root.update(segment_hash.as_bytes());

            let fragments = self.write_fragments(segment, dir)?;
            names.push((segment_hash, fragments));
            if n < buf.len() {
                break;
            }
        }

        let root_hash = hex::encode(root.finalize());
        info!(file = %path.display(), root_hash = %root_hash, segments = names.len(), "file sharded");
        Ok((names, root_hash))
    }

    fn write_fragments(&self, segment: &[u8], dir: &Path) -> Result<Vec<String>, ShardError> {
        let chunk_len = segment.len().div_ceil(self.data_shards).max(1);
        let mut padded = segment.to_vec();
        padded.resize(chunk_len * self.data_shards, 0);

        let mut parity = vec![0u8; chunk_len];
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.data_shards + self.parity_shards);
        for chunk in padded.chunks(chunk_len) {
            for (p, b) in parity.iter_mut().zip(chunk) {
                *p ^= b;
            }
            shards.push(chunk.to_vec());
        }
        shards.extend(std::iter::repeat(parity).take(self.parity_shards));

        let mut names = Vec::with_capacity(shards.len());
        for (index, shard) in shards.iter().enumerate() {
            // Parity shards share content, so the index is part of the name.
            let mut hasher = Sha256::new();
            hasher.update([index as u8]);
            hasher.update(shard);
            let name = hex::encode(hasher.finalize());
            fs::write(dir.join(&name), shard)?;
            names.push(name);
        }
        Ok(names)
    }
}

fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[async_trait]
impl Sharder for LocalSharder {
    async fn shard_file(&self, path: &Path, cipher: Option<&str>) -> Result<ShardOutput, ShardError> {
        if cipher.is_some() {
            return Err(ShardError::Failed("the local sharder does not encrypt".into()));
        }
        let sharder = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || sharder.shard_blocking(&path))
            .await
            .map_err(|e| ShardError::Failed(format!("sharding task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shard_layout() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        std::fs::write(&input, vec![7u8; 2500]).unwrap();

        let sharder = LocalSharder::new(dir.path().join("fragment"), 2, 3).with_segment_size(1000);
        let output = sharder.shard_file(&input, None).await.unwrap();

        assert_eq!(output.segments.len(), 3);
        for segment in &output.segments {
            assert_eq!(segment.width(), 5);
            assert!(Path::new(&segment.segment_hash).is_file());
            for fragment in &segment.fragment_hashes {
                assert!(Path::new(fragment).is_file());
            }
        }
        let last = &output.segments[2];
        let first_chunk = std::fs::read(&last.fragment_hashes[0]).unwrap();
        assert_eq!(first_chunk.len(), 250);

        let parent = Path::new(&output.segments[0].segment_hash).parent().unwrap();
        assert!(parent.ends_with(&output.root_hash));
    }

    #[tokio::test]
    async fn test_same_content_same_root() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        std::fs::write(&input, b"hello ferry").unwrap();
        let sharder = LocalSharder::new(dir.path().join("fragment"), 4, 8);

        let a = sharder.shard_file(&input, None).await.unwrap();
        let b = sharder.shard_file(&input, None).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.segments[0].width(), 12);
    }

    #[tokio::test]
    async fn test_empty_file_has_one_segment() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        std::fs::write(&input, b"").unwrap();
        let output = LocalSharder::new(dir.path().join("fragment"), 2, 1)
            .shard_file(&input, None)
            .await
            .unwrap();
        assert_eq!(output.segments.len(), 1);
        assert_eq!(output.segments[0].width(), 3);
    }

    #[tokio::test]
    async fn test_cipher_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalSharder::new(dir.path(), 2, 1)
            .shard_file(&dir.path().join("x"), Some("key"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShardError::Failed(_)));
    }
}
