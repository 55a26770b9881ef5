//! Ferry Node - keeps accepted files moving to storage peers.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ferry_node::{init_logging, peer, Config, LogFormat, Node};
use ferry_transfer::Session;
use ferry_types::AccountId;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Ferry Node - fragment distribution for a storage gateway
#[derive(Parser, Debug)]
#[command(name = "ferry-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ferry.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Run against in-memory chain and sharding backends
    #[arg(long)]
    local: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the job tracker (default)
    Run,
    /// Shard a file and track it for distribution
    Put {
        /// File to store
        file: PathBuf,
        /// Owner account (hex encoded public key)
        #[arg(long)]
        owner: AccountId,
        /// Bucket name
        #[arg(long, default_value = "default")]
        bucket: String,
    },
    /// Run a storage peer that accepts pushed fragments
    Peer {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:7001")]
        listen: SocketAddr,
        /// Directory fragments are written into
        #[arg(long, default_value = "./peer")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(format) = args.log_format {
        config.log_format = format;
    }
    config.local |= args.local;

    init_logging(&config.log_level, LogFormat::parse(&config.log_format));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ferry node");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("shutdown requested");
        signal.cancel();
    });

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            let node = Node::build(config)?;
            node.run(shutdown).await;
        }
        Command::Put { file, owner, bucket } => {
            let node = Node::build(config)?;
            let (root_hash, acceptance) = node.put(&file, owner, &bucket).await?;
            println!("{root_hash} {acceptance:?}");
        }
        Command::Peer { listen, dir } => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let listener = TcpListener::bind(listen)
                .await
                .with_context(|| format!("failed to bind {listen}"))?;
            let session = Session::new(dir, config.transfer_config());
            peer::serve(listener, session, shutdown).await?;
        }
    }

    tracing::info!("ferry node stopped");
    Ok(())
}
