//! Wiring of the gateway's distribution pipeline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use ferry_peers::StaticPeerDirectory;
use ferry_tracker::{
    Acceptance, ChainClient, DistributionEngine, JobLedger, MemoryChain, Sharder, Tracker,
};
use ferry_transfer::{Credentials, MemoryCache, Session, TcpTransport};
use ferry_types::{AccountId, JobRecord};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::local::LocalSharder;

/// A gateway node.
pub struct Node {
    config: Config,
    tracker: Arc<Tracker>,
    sharder: Arc<LocalSharder>,
}

impl Node {
    /// Builds a node from `config`.
    ///
    /// Only local mode is available: the chain is kept in memory and
    /// sharding happens on this machine.
    pub fn build(config: Config) -> anyhow::Result<Self> {
        if !config.local {
            bail!("no chain client is configured; run with --local");
        }
        let account = config.account_id()?;
        for dir in [config.file_dir(), config.fragment_dir(), config.track_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let chain = Arc::new(MemoryChain::new(account));
        chain.set_open_authority(true);

        let cache = Arc::new(MemoryCache::default());
        let session = Session::new(config.fragment_dir(), config.transfer_config()).with_cache(cache.clone());
        let credentials = Credentials {
            public_key: account.as_bytes().to_vec(),
            ..Credentials::default()
        };
        let transport = Arc::new(TcpTransport::new(session, credentials));
        let peers = Arc::new(StaticPeerDirectory::new(config.peers.clone()));

        let engine = DistributionEngine::new(chain.clone(), peers, transport, config.distribution_config());
        let sharder = Arc::new(LocalSharder::new(
            config.fragment_dir(),
            config.distribution.data_shards,
            config.distribution.parity_shards,
        ));
        let ledger = JobLedger::open(config.track_dir())?;
        let tracker = Tracker::new(
            ledger,
            chain as Arc<dyn ChainClient>,
            sharder.clone() as Arc<dyn Sharder>,
            engine,
            config.tracker_config(),
        )
        .with_cache(cache);

        info!(
            workspace = %config.workspace.display(),
            account = %account,
            peers = config.peers.len(),
            "node built"
        );
        Ok(Self {
            config,
            tracker: Arc::new(tracker),
            sharder,
        })
    }

    /// The job tracker.
    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// Shards `path`, retains a raw copy and hands the job to the tracker.
    pub async fn put(&self, path: &Path, owner: AccountId, bucket: &str) -> anyhow::Result<(String, Acceptance)> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no file name", path.display()))?
            .to_string();
        let file_size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();

        let output = self.sharder.shard_file(path, None).await?;
        let raw = self.config.file_dir().join(&output.root_hash);
        tokio::fs::copy(path, &raw)
            .await
            .with_context(|| format!("failed to retain {}", raw.display()))?;

        let record = JobRecord::new(
            output.root_hash.clone(),
            owner.as_bytes().to_vec(),
            file_name,
            bucket,
            file_size,
            output.segments,
        );
        let acceptance = self.tracker.accept(record).await?;
        info!(root_hash = %output.root_hash, ?acceptance, "file accepted");
        Ok((output.root_hash, acceptance))
    }

    /// Runs the tracker until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.tracker.clone().run(shutdown).await;
    }
}
