//! Node configuration.
//!
//! Loaded from a YAML file, with `FERRY__`-prefixed environment variables
//! layered on top (`FERRY__TRACKER__MAX_CONCURRENT_JOBS=4`). Durations are
//! whole seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ferry_protocol::MAX_PAYLOAD_LEN;
use ferry_tracker::{DistributionConfig, RetryPolicy, TrackerConfig};
use ferry_transfer::TransferConfig;
use ferry_types::{AccountId, PeerInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// Configuration for the Ferry node.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Base directory; `file/`, `fragment/` and `track/` live under it.
    #[validate(custom(function = "validate_workspace"))]
    pub workspace: PathBuf,
    /// Gateway signing account (hex encoded public key).
    #[validate(custom(function = "validate_account"))]
    pub account: String,
    /// Job tracker scheduling.
    #[validate(nested)]
    pub tracker: TrackerSection,
    /// Fragment placement.
    #[validate(nested)]
    pub distribution: DistributionSection,
    /// Transfer timeouts and buffers.
    #[validate(nested)]
    pub transfer: TransferSection,
    /// Storage peers.
    pub peers: Vec<PeerInfo>,
    /// Log level.
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,
    /// Log format, `pretty` or `json`.
    #[validate(custom(function = "validate_log_format"))]
    pub log_format: String,
    /// Run against in-memory chain and sharding backends.
    pub local: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("./data"),
            account: "00".repeat(32),
            tracker: TrackerSection::default(),
            distribution: DistributionSection::default(),
            transfer: TransferSection::default(),
            peers: Vec::new(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            local: false,
        }
    }
}

/// Tracker scheduling, durations in seconds.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct TrackerSection {
    /// Ceiling on concurrently serviced jobs.
    #[validate(range(min = 1, max = 1000))]
    pub max_concurrent_jobs: usize,
    /// Pause between worker starts.
    pub worker_spacing: u64,
    /// Pause when the ledger is empty.
    #[validate(range(min = 1))]
    pub idle_interval: u64,
    /// Pause between sweeps.
    #[validate(range(min = 1))]
    pub sweep_interval: u64,
    /// Pause between distribution passes of one job.
    pub pass_interval: u64,
    /// Wait for a submitted order to become visible.
    pub order_settle_delay: u64,
    /// Age after which cached status reports are purged.
    #[validate(range(min = 1))]
    pub cache_retention: u64,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            worker_spacing: 6,
            idle_interval: 60,
            sweep_interval: 60,
            pass_interval: 180,
            order_settle_delay: 18,
            cache_retention: 24 * 60 * 60,
        }
    }
}

/// Fragment placement settings.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_shard_width"))]
pub struct DistributionSection {
    /// Attempts per fragment on one peer.
    #[validate(range(min = 1, max = 100))]
    pub fragment_attempts: u32,
    /// Seconds between fragment attempts.
    pub fragment_backoff: u64,
    /// Data shards per segment.
    #[validate(range(min = 1))]
    pub data_shards: usize,
    /// Parity shards per segment.
    pub parity_shards: usize,
}

impl Default for DistributionSection {
    fn default() -> Self {
        Self {
            fragment_attempts: 10,
            fragment_backoff: 18,
            data_shards: ferry_types::DATA_SHARDS,
            parity_shards: ferry_types::PARITY_SHARDS,
        }
    }
}

impl DistributionSection {
    /// Fragments per segment.
    pub fn shard_width(&self) -> usize {
        self.data_shards + self.parity_shards
    }
}

/// Transfer settings, durations in seconds.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct TransferSection {
    /// Chunk buffer capacity in bytes.
    #[validate(range(min = 1024, max = MAX_PAYLOAD_LEN))]
    pub buffer_size: usize,
    /// Wait for a head acknowledgement.
    #[validate(range(min = 1))]
    pub head_timeout: u64,
    /// Wait for a status report.
    #[validate(range(min = 1))]
    pub status_timeout: u64,
    /// Wait for a recv-head acknowledgement.
    #[validate(range(min = 1))]
    pub recv_head_timeout: u64,
    /// Minimum wait for an end acknowledgement.
    #[validate(range(min = 1))]
    pub end_timeout_floor: u64,
    /// Minimum wait for a pulled file.
    #[validate(range(min = 1))]
    pub recv_timeout_floor: u64,
    /// Dial timeout.
    #[validate(range(min = 1))]
    pub connect_timeout: u64,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            buffer_size: ferry_protocol::DEFAULT_BUFFER_SIZE,
            head_timeout: 10,
            status_timeout: 10,
            recv_head_timeout: 5,
            end_timeout_floor: 10,
            recv_timeout_floor: 5,
            connect_timeout: 5,
        }
    }
}

impl Config {
    /// Loads `path` (if it exists) plus environment overrides and validates
    /// the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("FERRY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// The gateway account.
    pub fn account_id(&self) -> Result<AccountId, ConfigError> {
        self.account.parse().map_err(|_| {
            let mut errors = ValidationErrors::new();
            errors.add("account", ValidationError::new("account"));
            ConfigError::Invalid(errors)
        })
    }

    /// Retained raw files.
    pub fn file_dir(&self) -> PathBuf {
        self.workspace.join("file")
    }

    /// Sharded fragments, one directory per root hash.
    pub fn fragment_dir(&self) -> PathBuf {
        self.workspace.join("fragment")
    }

    /// Job ledger.
    pub fn track_dir(&self) -> PathBuf {
        self.workspace.join("track")
    }

    /// Tracker settings.
    pub fn tracker_config(&self) -> TrackerConfig {
        let t = &self.tracker;
        TrackerConfig {
            file_dir: self.file_dir(),
            max_concurrent_jobs: t.max_concurrent_jobs,
            worker_spacing: Duration::from_secs(t.worker_spacing),
            idle_interval: Duration::from_secs(t.idle_interval),
            sweep_interval: Duration::from_secs(t.sweep_interval),
            pass_interval: Duration::from_secs(t.pass_interval),
            order_settle_delay: Duration::from_secs(t.order_settle_delay),
            cache_retention: Duration::from_secs(t.cache_retention),
        }
    }

    /// Distribution settings.
    pub fn distribution_config(&self) -> DistributionConfig {
        let d = &self.distribution;
        DistributionConfig {
            retry: RetryPolicy::fixed(d.fragment_attempts, Duration::from_secs(d.fragment_backoff)),
            shard_width: d.shard_width(),
        }
    }

    /// Transfer settings.
    pub fn transfer_config(&self) -> TransferConfig {
        let t = &self.transfer;
        TransferConfig {
            buffer_size: t.buffer_size,
            head_timeout: Duration::from_secs(t.head_timeout),
            status_timeout: Duration::from_secs(t.status_timeout),
            recv_head_timeout: Duration::from_secs(t.recv_head_timeout),
            end_timeout_floor: Duration::from_secs(t.end_timeout_floor),
            recv_timeout_floor: Duration::from_secs(t.recv_timeout_floor),
            connect_timeout: Duration::from_secs(t.connect_timeout),
        }
    }
}

fn validate_workspace(path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("workspace"));
    }
    Ok(())
}

fn validate_account(account: &str) -> Result<(), ValidationError> {
    account
        .parse::<AccountId>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("account"))
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("log_level")),
    }
}

fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    match format {
        "pretty" | "json" => Ok(()),
        _ => Err(ValidationError::new("log_format")),
    }
}

fn validate_shard_width(section: &DistributionSection) -> Result<(), ValidationError> {
    if section.shard_width() > u8::MAX as usize {
        let mut err = ValidationError::new("shard_width");
        err.message = Some("data_shards + parity_shards must fit a shard index".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.distribution.shard_width(), 12);
        assert_eq!(config.tracker_config().max_concurrent_jobs, 10);
        assert_eq!(
            config.distribution_config().retry.delay,
            Duration::from_secs(18)
        );
        assert_eq!(config.transfer_config().connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.yaml");
        std::fs::write(
            &path,
            r#"
workspace: /srv/ferry
local: true
log_format: json
tracker:
  max_concurrent_jobs: 4
  pass_interval: 30
distribution:
  data_shards: 2
  parity_shards: 1
peers:
  - id: "0101010101010101010101010101010101010101010101010101010101010101"
    address: "127.0.0.1:7001"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.local);
        assert_eq!(config.track_dir(), PathBuf::from("/srv/ferry/track"));
        assert_eq!(config.tracker.max_concurrent_jobs, 4);
        assert_eq!(config.tracker.idle_interval, 60);
        assert_eq!(config.tracker_config().pass_interval, Duration::from_secs(30));
        assert_eq!(config.distribution_config().shard_width, 3);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].address.port(), 7001);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.tracker.max_concurrent_jobs, 10);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.tracker.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.account = "not-hex".into();
        assert!(config.validate().is_err());
        assert!(config.account_id().is_err());

        let mut config = Config::default();
        config.distribution.parity_shards = 300;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log_format = "xml".into();
        assert!(config.validate().is_err());
    }
}
