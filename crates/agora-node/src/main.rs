//! agora-node — the Agora marketplace node binary.
//!
//! Startup sequence:
//!   1. Load configuration (JSON file, defaults otherwise)
//!   2. Open the market database
//!   3. Connect coordination state (Redis, or in-memory for dev)
//!   4. Resolve the pluggable drivers: secrets and the sandbox runner
//!   5. Startup recovery: re-enqueue deadlines, re-spawn deposit watchers
//!      and withdrawal workers
//!   6. Start the deadline consumer and the RPC server
//!   7. Run until interrupted, then signal shutdown

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use agora_auth::{Authenticator, RateLimiter};
use agora_coord::{
    connect_redis, DeadlineSet, MemoryDeadlineSet, MemoryNonceStore, MemoryRateBuckets,
    NonceStore, RateBuckets, RedisDeadlineSet, RedisNonceStore, RedisRateBuckets,
};
use agora_core::config::{CoordinationDriver, MarketConfig, SandboxDriver};
use agora_jobs::{DeadlineConsumer, JobService};
use agora_ledger::{Ledger, LockManager};
use agora_rpc::{RpcServer, RpcServerState};
use agora_sandbox::{ClusterRunner, DockerRunner, ScriptRunner};
use agora_store::MarketDb;
use agora_wallet::{resolve_secrets, HttpEvmClient, WalletService};

#[derive(Parser, Debug)]
#[command(
    name = "agora-node",
    version,
    about = "Agora node — the agent-to-agent service marketplace"
)]
struct Args {
    /// Directory for the persistent market database.
    #[arg(long, default_value = "~/.agora/data")]
    data_dir: PathBuf,

    /// RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    rpc_addr: SocketAddr,

    /// Path to the JSON configuration file (defaults apply when omitted).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MarketConfig> {
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("reading config from {}", p.display()))?;
            serde_json::from_str(&raw).context("parsing config JSON")
        }
        None => Ok(MarketConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,agora=debug".parse().expect("static filter")),
        )
        .init();

    let args = Args::parse();
    info!("Agora node starting");

    let config = load_config(args.config.as_deref())?;

    // ── Market database ───────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Arc::new(MarketDb::open(&data_dir).context("opening market database")?);

    // ── Coordination state ────────────────────────────────────────────────────
    let (nonces, buckets, deadlines): (
        Arc<dyn NonceStore>,
        Arc<dyn RateBuckets>,
        Arc<dyn DeadlineSet>,
    ) = match &config.coordination.driver {
        CoordinationDriver::Memory => {
            info!("coordination state: in-memory (single node)");
            (
                Arc::new(MemoryNonceStore::new()),
                Arc::new(MemoryRateBuckets::new()),
                Arc::new(MemoryDeadlineSet::new()),
            )
        }
        CoordinationDriver::Redis { url } => {
            let con = connect_redis(url).await.context("connecting to redis")?;
            info!("coordination state: redis");
            (
                Arc::new(RedisNonceStore::new(con.clone())),
                Arc::new(RedisRateBuckets::new(con.clone())),
                Arc::new(RedisDeadlineSet::new(con)),
            )
        }
    };

    // ── Pluggable drivers ─────────────────────────────────────────────────────
    let secrets = resolve_secrets(&config.secrets.backend)
        .map_err(|e| anyhow::anyhow!("resolving secrets backend: {e}"))?;
    let runner: Arc<dyn ScriptRunner> = match &config.sandbox.driver {
        SandboxDriver::Docker => {
            info!("sandbox driver: local docker");
            Arc::new(DockerRunner::new())
        }
        SandboxDriver::Cluster { base_url } => {
            info!(%base_url, "sandbox driver: managed cluster");
            Arc::new(ClusterRunner::new(base_url.clone()))
        }
    };

    // ── Services ──────────────────────────────────────────────────────────────
    let locks = Arc::new(LockManager::new());
    let ledger = Arc::new(Ledger::new(Arc::clone(&db), locks, config.fees.clone()));
    let jobs = Arc::new(JobService::new(
        Arc::clone(&db),
        Arc::clone(&ledger),
        runner,
        Arc::clone(&deadlines),
        config.sandbox.clone(),
    ));
    let evm = Arc::new(HttpEvmClient::new(config.chain.resolved_rpc_url()));
    let wallet = Arc::new(WalletService::new(
        Arc::clone(&db),
        Arc::clone(&ledger),
        evm,
        config.chain.clone(),
        secrets.as_ref(),
    ));

    // ── Startup recovery ──────────────────────────────────────────────────────
    let consumer = DeadlineConsumer::new(
        Arc::clone(&db),
        Arc::clone(&ledger),
        Arc::clone(&deadlines),
    );
    let recovered = consumer.recover().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    let (deposits, withdrawals) = wallet.recover().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(
        deadlines = recovered,
        deposits, withdrawals, "startup recovery complete",
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(consumer.run(shutdown_rx));

    // ── RPC server ────────────────────────────────────────────────────────────
    let state = Arc::new(RpcServerState {
        authenticator: Authenticator::new(Arc::clone(&db), nonces, config.auth.clone()),
        limiter: RateLimiter::new(buckets, config.rate_limits.clone()),
        db,
        ledger,
        jobs,
        wallet,
        config,
        fetch_cards: true,
    });
    let handle = RpcServer::new(state)
        .start(args.rpc_addr)
        .await
        .map_err(|e| anyhow::anyhow!("starting RPC server: {e}"))?;

    info!("node ready");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");

    let _ = shutdown_tx.send(true);
    let _ = consumer_task.await;
    let _ = handle.stop();
    Ok(())
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
