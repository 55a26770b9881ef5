//! The job tracker.
//!
//! A polling loop lists the ledger and starts one supervised worker per
//! open job, up to a concurrency ceiling. Each worker drives its job
//! through [`transition`] until the job ends or a pass leaves it pending.
//! The tracker is the only component that mutates the ledger.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ferry_transfer::StatusCache;
use ferry_types::JobRecord;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::state::{transition, Action, ChainView};
use crate::{
    ChainClient, Disposition, DistributionEngine, DistributionReport, JobLedger, LedgerError,
    OrderRequest, Result, Sharder, TrackerError,
};

/// Tracker scheduling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Directory holding retained raw files, named by root hash.
    pub file_dir: PathBuf,
    /// Ceiling on concurrently serviced jobs.
    pub max_concurrent_jobs: usize,
    /// Pause between worker starts.
    pub worker_spacing: Duration,
    /// Pause when the ledger is empty.
    pub idle_interval: Duration,
    /// Pause between sweeps.
    pub sweep_interval: Duration,
    /// Pause between distribution passes of one job.
    pub pass_interval: Duration,
    /// Wait for a submitted order to become visible.
    pub order_settle_delay: Duration,
    /// Age after which cached status reports are purged.
    pub cache_retention: Duration,
}

impl TrackerConfig {
    /// Default settings with raw files under `file_dir`.
    pub fn new(file_dir: impl Into<PathBuf>) -> Self {
        Self {
            file_dir: file_dir.into(),
            max_concurrent_jobs: 10,
            worker_spacing: Duration::from_secs(6),
            idle_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            pass_interval: Duration::from_secs(180),
            order_settle_delay: Duration::from_secs(18),
            cache_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Result of servicing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The job ended successfully and its record is gone.
    Completed,
    /// A duplicate job became a primary job.
    Promoted,
    /// The job waits on another job's order.
    Pending,
    /// A distribution pass ran; the job stays open until storage confirms.
    Distributed(DistributionReport),
    /// The record disappeared before it could be loaded.
    Vanished,
}

/// How a newly uploaded file was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// The owner already holds the stored content.
    AlreadyStored,
    /// The content is stored; the owner was declared on it.
    OwnerDeclared,
    /// The owner already has a pending order for the content.
    AlreadyPending,
    /// Another owner's order is pending; tracked as a duplicate.
    Duplicate,
    /// Tracked as a new primary job.
    Tracked,
}

/// Root hashes currently being serviced.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// Claims `key`, or returns `None` if it is already claimed.
    pub fn try_acquire(&self, key: &str) -> Option<InFlightGuard> {
        if !self.keys.lock().insert(key.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            keys: self.keys.clone(),
            key: key.to_string(),
        })
    }

    /// Number of claimed keys.
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Returns true if nothing is claimed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` is claimed.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }
}

/// Releases its in-flight claim on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlightGuard {
    /// The claimed key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

/// Drives every open job to storage confirmation.
pub struct Tracker {
    ledger: JobLedger,
    chain: Arc<dyn ChainClient>,
    sharder: Arc<dyn Sharder>,
    engine: DistributionEngine,
    cache: Option<Arc<dyn StatusCache>>,
    config: TrackerConfig,
    in_flight: InFlight,
}

impl Tracker {
    /// Creates a tracker.
    pub fn new(
        ledger: JobLedger,
        chain: Arc<dyn ChainClient>,
        sharder: Arc<dyn Sharder>,
        engine: DistributionEngine,
        config: TrackerConfig,
    ) -> Self {
        Self {
            ledger,
            chain,
            sharder,
            engine,
            cache: None,
            config,
            in_flight: InFlight::default(),
        }
    }

    /// Purges `cache` on every sweep.
    pub fn with_cache(mut self, cache: Arc<dyn StatusCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The job ledger.
    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    /// The in-flight set.
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Takes in a newly uploaded file.
    ///
    /// Content the chain already stores or has an order for is not
    /// tracked again. Content another owner has a pending order for is
    /// tracked as a duplicate, unless this gateway already tracks it.
    pub async fn accept(&self, record: JobRecord) -> Result<Acceptance> {
        let root_hash = record.root_hash.clone();

        if let Some(meta) = self.chain.query_file_metadata(&root_hash).await? {
            if meta.has_owner(&record.owner) {
                return Ok(Acceptance::AlreadyStored);
            }
            let tx = self
                .chain
                .generate_storage_order(&OrderRequest::declaration(&record))
                .await?;
            info!(root_hash = %root_hash, tx = %tx, "owner declared on stored content");
            return Ok(Acceptance::OwnerDeclared);
        }

        if let Some(order) = self.chain.query_storage_order(&root_hash).await? {
            if order.owner.is_some_and(|owner| owner.as_bytes()[..] == record.owner[..]) {
                return Ok(Acceptance::AlreadyPending);
            }
            if self.ledger.contains(&root_hash) {
                return Err(TrackerError::DuplicateOrder(root_hash));
            }
            self.ledger.store(&record.into_duplicate())?;
            info!(root_hash = %root_hash, "tracking duplicate of pending order");
            return Ok(Acceptance::Duplicate);
        }

        self.ledger.store(&record)?;
        info!(root_hash = %root_hash, "tracking new job");
        Ok(Acceptance::Tracked)
    }

    /// Runs one pass over the job stored under `key`.
    pub async fn service_once(&self, key: &str) -> Result<Outcome> {
        let mut record = match self.ledger.load(key) {
            Ok(record) => record,
            Err(LedgerError::NotFound(_)) => return Ok(Outcome::Vanished),
            Err(e @ LedgerError::Corrupt { .. }) => {
                let moved = self.ledger.quarantine(key)?;
                error!(root_hash = key, path = %moved.display(), error = %e, "quarantined corrupt job record");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = self.chain.query_file_metadata(key).await?;
        let order = match metadata {
            Some(_) => None,
            None => self.chain.query_storage_order(key).await?,
        };
        let mut view = ChainView::new(metadata, order);

        loop {
            let (mut next, action) = transition(key, &record, &view);
            debug!(root_hash = key, ?action, "job transition");
            match action {
                Action::Cleanup => {
                    self.remove_artifacts(&record).await;
                    self.ledger.remove(key)?;
                    info!(root_hash = key, "storage confirmed");
                    return Ok(Outcome::Completed);
                }
                Action::Corrupt { reason } => {
                    self.ledger.remove(key)?;
                    return Err(TrackerError::Corrupt {
                        root_hash: key.to_string(),
                        reason,
                    });
                }
                Action::DeclareOwner => {
                    let tx = self
                        .chain
                        .generate_storage_order(&OrderRequest::declaration(&record))
                        .await?;
                    self.retain_raw_file(&record).await;
                    self.ledger.remove(key)?;
                    info!(root_hash = key, tx = %tx, "duplicate declared");
                    return Ok(Outcome::Completed);
                }
                Action::PromoteToPrimary => {
                    self.ledger.store(&next)?;
                    info!(root_hash = key, "duplicate became primary");
                    return Ok(Outcome::Promoted);
                }
                Action::AwaitPrimary => {
                    debug!(root_hash = key, "duplicate waits on primary order");
                    return Ok(Outcome::Pending);
                }
                Action::CheckAuthorization => {
                    self.ledger.store(&next)?;
                    record = next;
                    let accounts = self.chain.query_authority_list(&record.owner).await?;
                    view = view.with_authority(accounts.as_deref(), &self.chain.signature_account());
                }
                Action::Deauthorized => {
                    self.remove_artifacts(&record).await;
                    self.ledger.remove(key)?;
                    return Err(TrackerError::Deauthorized {
                        root_hash: key.to_string(),
                        owner: hex::encode(&record.owner),
                    });
                }
                Action::GenerateOrder => {
                    let tx = self
                        .chain
                        .generate_storage_order(&OrderRequest::for_record(&record))
                        .await?;
                    info!(root_hash = key, tx = %tx, "storage order submitted");
                    tokio::time::sleep(self.config.order_settle_delay).await;
                    view.order = self.chain.query_storage_order(key).await?;
                    if view.order.is_none() {
                        return Err(TrackerError::OrderMissing(key.to_string()));
                    }
                    record = next;
                }
                Action::Reshard => {
                    let path = self.config.file_dir.join(key);
                    let output = self.sharder.shard_file(&path, None).await?;
                    if output.root_hash != key {
                        self.ledger.remove(key)?;
                        return Err(TrackerError::Corrupt {
                            root_hash: key.to_string(),
                            reason: format!("resharded root hash {} differs", output.root_hash),
                        });
                    }
                    next.segments = output.segments;
                    self.ledger.store(&next)?;
                    info!(root_hash = key, segments = next.segments.len(), "job resharded");
                    record = next;
                }
                Action::Distribute => {
                    let complete = view
                        .order
                        .as_ref()
                        .map(|o| o.complete_list.as_slice())
                        .unwrap_or_default();
                    let report = match self.engine.distribute(key, &record.segments, complete).await {
                        Ok(report) => report,
                        Err(e @ TrackerError::Corrupt { .. }) => {
                            self.ledger.remove(key)?;
                            return Err(e);
                        }
                        Err(e) => return Err(e),
                    };
                    next.count = next.count.saturating_add(1);
                    if report.is_complete() {
                        next.put_flag = true;
                    }
                    self.ledger.store(&next)?;
                    info!(
                        root_hash = key,
                        placed = report.placed.len(),
                        already_complete = report.already_complete.len(),
                        unplaced = report.unplaced.len(),
                        pass = next.count,
                        "distribution pass finished"
                    );
                    return Ok(Outcome::Distributed(report));
                }
            }
        }
    }

    /// Services `key` until it ends, waits on another job, fails, or
    /// `cancel` fires between passes.
    pub async fn service(&self, key: &str, cancel: &CancellationToken) -> Result<Outcome> {
        loop {
            let outcome = self.service_once(key).await?;
            if !matches!(outcome, Outcome::Distributed(_)) {
                return Ok(outcome);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(outcome),
                _ = tokio::time::sleep(self.config.pass_interval) => {}
            }
        }
    }

    /// Runs one pass over every job not already in flight, in key order.
    pub async fn sweep(&self) -> Result<Vec<(String, Result<Outcome>)>> {
        self.purge_cache();
        let mut results = Vec::new();
        for key in self.ledger.list()? {
            let Some(_guard) = self.in_flight.try_acquire(&key) else {
                continue;
            };
            let outcome = self.service_once(&key).await;
            log_outcome(&key, &outcome);
            results.push((key, outcome));
        }
        Ok(results)
    }

    /// Polls the ledger and services jobs until `shutdown` fires.
    ///
    /// Workers still running at shutdown are aborted; every ledger write
    /// is atomic, so an aborted job resumes from its last record.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            track_dir = %self.ledger.dir().display(),
            max_jobs = self.config.max_concurrent_jobs,
            "tracker started"
        );
        let mut workers = JoinSet::new();

        while !shutdown.is_cancelled() {
            while workers.try_join_next().is_some() {}
            self.purge_cache();

            let keys = match self.ledger.list() {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "failed to list job ledger");
                    pause(&shutdown, self.config.worker_spacing).await;
                    continue;
                }
            };
            if keys.is_empty() {
                pause(&shutdown, self.config.idle_interval).await;
                continue;
            }

            for key in keys {
                if shutdown.is_cancelled() || self.in_flight.len() >= self.config.max_concurrent_jobs {
                    break;
                }
                let Some(guard) = self.in_flight.try_acquire(&key) else {
                    continue;
                };
                workers.spawn(supervise(self.clone(), guard, shutdown.child_token()));
                pause(&shutdown, self.config.worker_spacing).await;
            }
            pause(&shutdown, self.config.sweep_interval).await;
        }

        if !workers.is_empty() {
            info!(workers = workers.len(), "aborting in-flight jobs");
        }
        workers.shutdown().await;
        info!("tracker stopped");
    }

    fn purge_cache(&self) {
        if let Some(cache) = &self.cache {
            let purged = cache.purge_older_than(self.config.cache_retention);
            if purged > 0 {
                debug!(purged, "purged stale status reports");
            }
        }
    }

    /// Removes a job's fragment directory and retained raw file.
    async fn remove_artifacts(&self, record: &JobRecord) {
        if let Some(dir) = record.fragment_dir() {
            remove_path(&dir).await;
        }
        remove_path(&self.config.file_dir.join(&record.root_hash)).await;
    }

    /// Keeps a duplicate's raw copy in the file directory and drops its
    /// fragments.
    async fn retain_raw_file(&self, record: &JobRecord) {
        let Some(dir) = record.fragment_dir() else {
            return;
        };
        let raw = dir.join(&record.root_hash);
        if tokio::fs::try_exists(&raw).await.unwrap_or(false) {
            let target = self.config.file_dir.join(&record.root_hash);
            if let Err(e) = tokio::fs::rename(&raw, &target).await {
                warn!(from = %raw.display(), to = %target.display(), error = %e, "failed to retain raw file");
            }
        }
        remove_path(&dir).await;
    }
}

/// Runs one job, containing and logging a panic.
///
/// The guard lives in the same task as the job, so aborting the task stops
/// the job before its in-flight claim is released.
async fn supervise(tracker: Arc<Tracker>, guard: InFlightGuard, cancel: CancellationToken) {
    let key = guard.key().to_string();
    info!(root_hash = %key, "start tracking");
    match AssertUnwindSafe(tracker.service(&key, &cancel)).catch_unwind().await {
        Ok(outcome) => log_outcome(&key, &outcome),
        Err(_) => error!(root_hash = %key, "job worker panicked"),
    }
    drop(guard);
    info!(root_hash = %key, "end tracking");
}

fn log_outcome(key: &str, outcome: &Result<Outcome>) {
    match outcome {
        Ok(Outcome::Completed) => info!(root_hash = key, "job completed"),
        Ok(Outcome::Distributed(report)) if !report.is_complete() => {
            warn!(root_hash = key, unplaced = ?report.unplaced, "job left pending")
        }
        Ok(outcome) => debug!(root_hash = key, ?outcome, "job serviced"),
        Err(e) => match e.disposition() {
            Disposition::Integrity => error!(root_hash = key, error = %e, "job aborted"),
            Disposition::Deauthorized => error!(root_hash = key, error = %e, "job dropped"),
            Disposition::Protocol => warn!(root_hash = key, error = %e, "peer protocol violation"),
            Disposition::Exhausted => warn!(root_hash = key, error = %e, "no peers available"),
            Disposition::Transient => warn!(root_hash = key, error = %e, "job will be retried"),
        },
    }
}

async fn pause(shutdown: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

async fn remove_path(path: &Path) {
    let removed = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(_) => return,
    };
    if let Err(e) = removed {
        warn!(path = %path.display(), error = %e, "failed to remove job artifact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_releases() {
        let in_flight = InFlight::default();
        let guard = in_flight.try_acquire("a").unwrap();
        assert!(in_flight.try_acquire("a").is_none());
        assert!(in_flight.contains("a"));
        assert_eq!(in_flight.len(), 1);
        drop(guard);
        assert!(in_flight.is_empty());
        assert!(in_flight.try_acquire("a").is_some());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let in_flight = InFlight::default();
        let cloned = in_flight.clone();
        let result = std::thread::spawn(move || {
            let _guard = cloned.try_acquire("a").unwrap();
            panic!("worker failed");
        })
        .join();
        assert!(result.is_err());
        assert!(in_flight.is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::new("/w/file");
        assert_eq!(config.max_concurrent_jobs, 10);
        assert_eq!(config.pass_interval, Duration::from_secs(180));
        assert_eq!(config.cache_retention, Duration::from_secs(86_400));
    }
}
