//! chainwatch CLI — follow a chain tip into a relational store.
//!
//! Usage:
//! ```bash
//! chainwatch run --network ethereum --database-url sqlite:./chainwatch.db --offset 20
//! chainwatch run --network polygon --database-url postgres://localhost/chainwatch --stop-height 50000000
//! chainwatch info
//! ```
//!
//! Every `run` option can also be set through the environment (or a `.env` file).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chainwatch_core::store::Store;
use chainwatch_evm::{HttpChainSource, Network, WatcherBuilder};
use chainwatch_storage::postgres::PostgresStore;
use chainwatch_storage::sqlite::SqliteStore;
use chainwatch_storage::InMemoryStore;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "chainwatch", version, about = "Reorg-aware chain tip ingester")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the chain tip and persist blocks, transactions and logs.
    Run(RunArgs),
    /// Show the built-in network profiles.
    Info,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Network profile (ethereum, sepolia, polygon, bsc)
    #[arg(long, env = "CHAINWATCH_NETWORK", default_value = "ethereum")]
    network: Network,

    /// JSON-RPC endpoint; defaults to the profile's Infura or public endpoint
    #[arg(long, env = "CHAINWATCH_RPC_URL")]
    rpc_url: Option<String>,

    /// Infura project key used for the default endpoint
    #[arg(long, env = "INFURA_API_KEY", hide_env_values = true)]
    infura_key: Option<String>,

    /// Store location: `sqlite:<path>`, `postgres://…`, or `memory`
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:./chainwatch.db")]
    database_url: String,

    /// Start this many blocks behind the tip when the store is empty
    #[arg(long, env = "CHAINWATCH_OFFSET", default_value_t = 10)]
    offset: u64,

    /// Confirmations closing a fork window; defaults to the network profile
    #[arg(long, env = "CHAINWATCH_CONFIRMATIONS")]
    confirmations: Option<u64>,

    /// Stop after this height (with a final flush)
    #[arg(long, env = "CHAINWATCH_STOP_HEIGHT")]
    stop_height: Option<u64>,

    /// Transactions of one block written concurrently
    #[arg(long, env = "CHAINWATCH_MAX_CONCURRENCY", default_value_t = 16)]
    max_concurrency: usize,

    /// Log filter when RUST_LOG is unset (e.g. `info`, `chainwatch_evm=debug`)
    #[arg(long, env = "CHAINWATCH_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "CHAINWATCH_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Info => {
            cmd_info();
            Ok(())
        }
    }
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    init_tracing(&args.log_level, args.json_logs)?;

    let profile = args.network.profile();
    let rpc_url = match args.rpc_url {
        Some(url) => url,
        None => profile.rpc_url(args.infura_key.as_deref()),
    };
    let source = HttpChainSource::new(rpc_url, RPC_TIMEOUT).context("failed to build RPC client")?;
    let store = open_store(&args.database_url).await?;

    let mut builder = WatcherBuilder::from_profile(&profile)
        .start_offset(args.offset)
        .max_concurrency(args.max_concurrency)
        .store(store);
    if let Some(depth) = args.confirmations {
        builder = builder.confirmation_depth(depth);
    }
    if let Some(height) = args.stop_height {
        builder = builder.stop_height(height);
    }
    let mut watcher = builder.build(source).context("invalid configuration")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let started_at = Utc::now();
    tracing::info!(
        network = %args.network,
        chain_id = profile.chain_id,
        confirmations = watcher.config().confirmation_depth,
        offset = args.offset,
        stop_height = ?args.stop_height,
        started_at = %started_at.to_rfc3339(),
        "chainwatch starting"
    );

    let stats = watcher
        .run(shutdown)
        .await
        .with_context(|| format!("watching {} failed", args.network))?;

    tracing::info!(
        blocks = stats.blocks,
        transactions = stats.transactions,
        logs = stats.logs,
        rewinds = stats.rewinds,
        elapsed_s = (Utc::now() - started_at).num_seconds(),
        "chainwatch finished"
    );
    Ok(())
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level '{level}'"))?,
    };
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

async fn open_store(url: &str) -> Result<Arc<dyn Store>> {
    if url == "memory" {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PostgresStore::connect(url)
            .await
            .context("failed to connect to PostgreSQL")?;
        return Ok(Arc::new(store));
    }
    let opened = if url == "sqlite::memory:" {
        SqliteStore::in_memory().await
    } else {
        SqliteStore::open(url).await
    };
    let store = opened.with_context(|| format!("failed to open SQLite database '{url}'"))?;
    Ok(Arc::new(store))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, finishing current block"),
        _ = terminate => tracing::info!("received SIGTERM, finishing current block"),
    }
}

fn cmd_info() {
    println!("chainwatch v{}", env!("CARGO_PKG_VERSION"));
    println!("  Storage backends: memory, SQLite (sqlite:<path>), PostgreSQL (postgres://…)");
    println!("  Networks:");
    for network in Network::ALL {
        let profile = network.profile();
        println!(
            "    {:<9} chain id {:<9} K={:<3} poll {:>5} ms  {:>4} req/s  {}",
            network.name(),
            profile.chain_id,
            profile.confirmation_depth,
            profile.poll_interval_ms,
            profile.rate_limit.refill_rate,
            profile.public_rpc,
        );
    }
    println!("  Set INFURA_API_KEY to use Infura instead of the public endpoint.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["chainwatch", "run"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.network, Network::Ethereum);
        assert_eq!(args.offset, 10);
        assert_eq!(args.confirmations, None);
        assert_eq!(args.max_concurrency, 16);
        assert!(!args.json_logs);
    }

    #[test]
    fn run_flags() {
        let cli = Cli::try_parse_from([
            "chainwatch",
            "run",
            "--network",
            "matic",
            "--database-url",
            "memory",
            "--offset",
            "3",
            "--confirmations",
            "32",
            "--stop-height",
            "1000",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.network, Network::Polygon);
        assert_eq!(args.database_url, "memory");
        assert_eq!(args.offset, 3);
        assert_eq!(args.confirmations, Some(32));
        assert_eq!(args.stop_height, Some(1000));
    }

    #[test]
    fn unknown_network_is_rejected() {
        assert!(Cli::try_parse_from(["chainwatch", "run", "--network", "solana"]).is_err());
    }

    #[tokio::test]
    async fn memory_store_opens() {
        let store = open_store("memory").await.unwrap();
        assert_eq!(store.counts().await.unwrap().blocks, 0);
    }
}
