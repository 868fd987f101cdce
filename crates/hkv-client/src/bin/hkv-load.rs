use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use rand::Rng;
use serde::Deserialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use hkv_client::{ConsistencyRouter, GrpcTransport, RetryPolicy};
use hkv_types::ConsistencyLevel;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Mode {
    /// One Put then one Get per operation.
    Request,
    /// One Put then `--get-ratio` Gets per operation.
    RequestRatio,
}

#[derive(clap::Parser, Debug)]
#[command(name = "hkv-load", about = "Hybrid KV load generator")]
struct Cli {
    /// Comma-separated server addresses
    #[arg(long, value_delimiter = ',', required = true)]
    servers: Vec<String>,
    #[arg(long, value_enum, default_value = "request")]
    mode: Mode,
    /// Concurrent clients, each with its own router
    #[arg(long, default_value_t = 1)]
    clients: usize,
    /// Operations per client
    #[arg(long, default_value_t = 1)]
    ops: usize,
    #[arg(long, default_value_t = 1)]
    get_ratio: usize,
    #[arg(long, default_value = "causal")]
    consistency: ConsistencyLevel,
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ClientConfig {
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    connect_timeout_ms: u64,
    request_timeout_ms: u64,
    deadline_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    client: ClientConfig,
    observability: ObservabilityConfig,
}

impl ClientConfig {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            // 0 means unbounded; the deadline still applies.
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            deadline: (self.deadline_ms > 0).then(|| Duration::from_millis(self.deadline_ms)),
        }
    }
}

#[derive(Default)]
struct Counters {
    puts: AtomicU64,
    gets: AtomicU64,
    hits: AtomicU64,
    errors: AtomicU64,
}

async fn run_client(
    mut router: ConsistencyRouter<GrpcTransport>,
    mode: Mode,
    ops: usize,
    get_ratio: usize,
    counters: Arc<Counters>,
) {
    let gets_per_put = match mode {
        Mode::Request => 1,
        Mode::RequestRatio => get_ratio,
    };
    for i in 0..ops {
        let (k, v) = {
            let mut rng = rand::rng();
            (rng.random_range(0..100_000u32), rng.random_range(0..100_000u32))
        };
        let key = format!("key{k}");
        let hint = i + 1;

        match router.put(hint, &key, &format!("value{v}")).await {
            Ok(()) => {
                counters.puts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%key, error = %e, "put failed");
                continue;
            }
        }
        for _ in 0..gets_per_put {
            match router.get(hint, &key).await {
                Ok(value) => {
                    counters.gets.fetch_add(1, Ordering::Relaxed);
                    if value.is_some() {
                        counters.hits.fetch_add(1, Ordering::Relaxed);
                    }
                    tracing::debug!(%key, ?value, clock = %router.clock(), "get");
                }
                Err(e) => {
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%key, error = %e, "get failed");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new()
        .merge(Toml::string(include_str!("../../../../config/default.toml")));
    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }
    let config: Config = figment
        .merge(Env::prefixed("HYBRIDKV_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.observability.log_format.as_str() {
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

    anyhow::ensure!(cli.clients > 0, "--clients must be at least 1");
    anyhow::ensure!(cli.ops > 0, "--ops must be at least 1");

    let transport = Arc::new(GrpcTransport::new(
        Duration::from_millis(config.client.connect_timeout_ms),
        Duration::from_millis(config.client.request_timeout_ms),
    ));
    let policy = config.client.policy();
    let cancel = CancellationToken::new();
    let counters = Arc::new(Counters::default());

    tracing::info!(
        servers = ?cli.servers,
        clients = cli.clients,
        ops = cli.ops,
        mode = ?cli.mode,
        consistency = ?cli.consistency,
        "load starting"
    );

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    for _ in 0..cli.clients {
        let router =
            ConsistencyRouter::new(transport.clone(), cli.servers.clone(), cli.consistency)?
                .with_policy(policy.clone())
                .with_cancellation(cancel.clone());
        tasks.spawn(run_client(router, cli.mode, cli.ops, cli.get_ratio, counters.clone()));
    }

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted; cancelling clients");
            ctrl_c.cancel();
        }
    });

    while let Some(joined) = tasks.join_next().await {
        joined.context("client task panicked")?;
    }

    let elapsed = started.elapsed();
    let puts = counters.puts.load(Ordering::Relaxed);
    let gets = counters.gets.load(Ordering::Relaxed);
    tracing::info!(
        puts,
        gets,
        hits = counters.hits.load(Ordering::Relaxed),
        errors = counters.errors.load(Ordering::Relaxed),
        elapsed_ms = elapsed.as_millis() as u64,
        ops_per_sec = (puts + gets) as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        "load finished"
    );
    Ok(())
}
