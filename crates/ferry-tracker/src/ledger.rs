//! Disk-persisted job ledger.
//!
//! One file per job, named by root hash, holding the JSON job record. The
//! presence of the file is the job's existence signal. Writes go to a
//! hidden temporary sibling that is fsynced and renamed over the target,
//! so a crash leaves either the old record or the new one.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use ferry_types::{JobRecord, MIN_RECORD_LEN};
use tracing::{debug, warn};

use crate::LedgerError;

type Result<T> = std::result::Result<T, LedgerError>;

/// Directory corrupt records are moved into.
const QUARANTINE_DIR: &str = ".corrupt";

/// The persisted set of open jobs.
#[derive(Debug, Clone)]
pub struct JobLedger {
    dir: PathBuf,
}

impl JobLedger {
    /// Opens (creating if needed) a ledger rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The ledger directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys of every persisted job, sorted.
    ///
    /// Hidden entries (temporaries, the quarantine) and directories are
    /// skipped.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            keys.push(name);
        }
        keys.sort();
        Ok(keys)
    }

    /// Returns true if a record exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.path_of(key).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Loads the record stored under `key`.
    pub fn load(&self, key: &str) -> Result<JobRecord> {
        let path = self.path_of(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(LedgerError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.len() < MIN_RECORD_LEN {
            return Err(LedgerError::Corrupt {
                key: key.to_string(),
                reason: format!("{} bytes is shorter than any record", bytes.len()),
            });
        }
        serde_json::from_slice(&bytes).map_err(|e| LedgerError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Durably writes `record` under its root hash.
    pub fn store(&self, record: &JobRecord) -> Result<()> {
        let key = record.root_hash.as_str();
        let path = self.path_of(key)?;
        let tmp = self.dir.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));
        let bytes = serde_json::to_vec(record)?;

        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)?;
            File::open(&self.dir)?.sync_all()
        })();
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %cleanup, "failed to remove temporary record");
                }
            }
            return Err(e.into());
        }
        debug!(root_hash = key, put_flag = record.put_flag, count = record.count, "job record stored");
        Ok(())
    }

    /// Deletes the record under `key`. Returns false if there was none.
    pub fn remove(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path_of(key)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves an unreadable record out of the way and returns its new path.
    pub fn quarantine(&self, key: &str) -> Result<PathBuf> {
        let quarantine = self.dir.join(QUARANTINE_DIR);
        fs::create_dir_all(&quarantine)?;
        let target = quarantine.join(format!("{key}.{}", uuid::Uuid::new_v4()));
        fs::rename(self.path_of(key)?, &target)?;
        Ok(target)
    }

    fn path_of(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || Path::new(key).file_name() != Some(key.as_ref()) {
            return Err(LedgerError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_types::Segment;

    fn record(root: &str) -> JobRecord {
        JobRecord::new(
            root,
            vec![1; 32],
            "photo.png",
            "bucket",
            4096,
            vec![Segment::new(
                format!("/w/{root}/s0"),
                (0..4).map(|i| format!("/w/{root}/f{i}")).collect(),
            )],
        )
    }

    #[test]
    fn test_store_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::open(dir.path()).unwrap();

        let mut rec = record("abc");
        ledger.store(&rec).unwrap();
        assert!(ledger.contains("abc"));
        assert_eq!(ledger.load("abc").unwrap(), rec);

        rec.count = 3;
        rec.put_flag = true;
        ledger.store(&rec).unwrap();
        assert_eq!(ledger.load("abc").unwrap(), rec);

        assert!(ledger.remove("abc").unwrap());
        assert!(!ledger.remove("abc").unwrap());
        assert!(matches!(ledger.load("abc"), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_list_skips_hidden_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::open(dir.path()).unwrap();
        ledger.store(&record("b")).unwrap();
        ledger.store(&record("a")).unwrap();
        fs::write(dir.path().join(".a.1234.tmp"), b"partial").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        assert_eq!(ledger.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_short_record_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::open(dir.path()).unwrap();
        fs::write(dir.path().join("abc"), b"{\"roothash\":\"abc\"}").unwrap();

        assert!(matches!(ledger.load("abc"), Err(LedgerError::Corrupt { .. })));
    }

    #[test]
    fn test_garbage_record_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::open(dir.path()).unwrap();
        fs::write(dir.path().join("abc"), vec![b'x'; 400]).unwrap();

        assert!(matches!(ledger.load("abc"), Err(LedgerError::Corrupt { .. })));

        let moved = ledger.quarantine("abc").unwrap();
        assert!(moved.exists());
        assert!(ledger.list().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::open(dir.path()).unwrap();
        for key in ["", "..", ".hidden", "a/b"] {
            assert!(matches!(ledger.load(key), Err(LedgerError::InvalidKey(_))), "{key}");
        }
        assert!(!ledger.contains("../x"));
    }

    #[test]
    fn test_store_leaves_no_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::open(dir.path()).unwrap();
        for i in 0..5 {
            let mut rec = record("abc");
            rec.count = i;
            ledger.store(&rec).unwrap();
        }
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
