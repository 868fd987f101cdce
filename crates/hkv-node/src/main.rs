use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use hkv_consensus::{ApplyMsg, StubLog};
use hkv_server::{serve_client, HandlerConfig, RequestHandler};
use hkv_storage::{FjallStore, LocalStore, MemStore};

#[derive(clap::Parser, Debug)]
#[command(name = "hkv-node", about = "Hybrid-consistency KV node")]
struct Cli {
    #[arg(long, default_value = "0.0.0.0:18000")]
    address: String,
    /// Defaults to `--address`
    #[arg(long)]
    replica_id: Option<String>,
    /// Peer addresses, repeatable. Logged only; replicas do not contact peers.
    #[arg(long = "peer")]
    peers: Vec<String>,
    /// Start as the log leader; overrides `consensus.bootstrap_leader`
    #[arg(long)]
    leader: bool,
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    #[arg(long, default_value = "/var/lib/hybridkv")]
    data_dir: std::path::PathBuf,
}

#[derive(Debug, Deserialize)]
struct StorageConfig {
    engine: String,
}

#[derive(Debug, Deserialize)]
struct ConsensusConfig {
    apply_channel_capacity: usize,
    apply_timeout_ms: u64,
    bootstrap_leader: bool,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    storage: StorageConfig,
    consensus: ConsensusConfig,
    observability: ObservabilityConfig,
}

async fn run<S: LocalStore>(
    addr: SocketAddr,
    replica_id: String,
    log: StubLog,
    apply_rx: tokio::sync::mpsc::Receiver<ApplyMsg>,
    store: S,
    config: &Config,
) -> anyhow::Result<()> {
    let handler = RequestHandler::spawn(
        replica_id,
        Arc::new(log),
        Arc::new(store),
        apply_rx,
        HandlerConfig {
            apply_timeout: Duration::from_millis(config.consensus.apply_timeout_ms),
        },
    );
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutting down");
    };
    serve_client(addr, handler, shutdown).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new()
        .merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let config: Config = figment
        .merge(Env::prefixed("HYBRIDKV_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    let log_format = config.observability.log_format.as_str();
    match log_format {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
    }

    let addr: SocketAddr = cli
        .address
        .parse()
        .with_context(|| format!("invalid address: {}", cli.address))?;
    let replica_id = cli.replica_id.clone().unwrap_or_else(|| cli.address.clone());
    let leader = cli.leader || config.consensus.bootstrap_leader;

    tracing::info!(
        replica = %replica_id,
        address = %addr,
        peers = ?cli.peers,
        engine = %config.storage.engine,
        leader,
        "node starting"
    );

    let (log, apply_rx) = StubLog::new(
        replica_id.clone(),
        config.consensus.apply_channel_capacity,
        leader,
    );

    match config.storage.engine.as_str() {
        "memory" => run(addr, replica_id, log, apply_rx, MemStore::new(), &config).await,
        "fjall" => {
            std::fs::create_dir_all(&cli.data_dir).with_context(|| {
                format!("failed to create data dir {}", cli.data_dir.display())
            })?;
            let store = FjallStore::open(&cli.data_dir)
                .with_context(|| format!("failed to open store at {}", cli.data_dir.display()))?;
            run(addr, replica_id, log, apply_rx, store, &config).await
        }
        other => anyhow::bail!("unknown storage engine: {other}"),
    }
}
