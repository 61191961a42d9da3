use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use whalefs::chunk::agent::ChunkAgent;
use whalefs::chunk::handlers as chunk_handlers;
use whalefs::chunk::store::{BlockStore, FsBlockStore};
use whalefs::config::{ChunkConfig, ClusterConfig};
use whalefs::master::coordinator::Master;
use whalefs::master::handlers as master_handlers;
use whalefs::transport::http::HttpTransport;
use whalefs::transport::master_client::HttpMasterClient;

#[derive(Parser, Debug)]
#[command(name = "whalefs", about = "Distributed block storage cluster")]
struct Cli {
    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, env = "WHALEFS_LOG_LEVEL", default_value = "info", global = true)]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the master (registry, placement, repair)
    Master(MasterArgs),
    /// Run a chunk server
    Chunk(ChunkArgs),
}

#[derive(Args, Debug)]
struct MasterArgs {
    /// HTTP listen address
    #[arg(long, env = "WHALEFS_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// JSON cluster config; flags below override its values
    #[arg(long, env = "WHALEFS_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "WHALEFS_BLOCK_SIZE")]
    block_size: Option<usize>,

    #[arg(long, env = "WHALEFS_REPLICATION_FACTOR")]
    replication_factor: Option<usize>,

    #[arg(long, env = "WHALEFS_HEARTBEAT_INTERVAL_MS")]
    heartbeat_interval_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct ChunkArgs {
    /// HTTP listen address for block transfers
    #[arg(long, env = "WHALEFS_BIND", default_value = "0.0.0.0:9000")]
    bind: SocketAddr,

    /// Master `host:port`
    #[arg(long, env = "WHALEFS_MASTER", default_value = "127.0.0.1:8000")]
    master: String,

    /// Address peers use to reach this server; defaults to the bind address
    #[arg(long, env = "WHALEFS_ADVERTISE")]
    advertise: Option<String>,

    #[arg(long, env = "WHALEFS_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, env = "WHALEFS_HEARTBEAT_INTERVAL_MS", default_value_t = whalefs::config::DEFAULT_HEARTBEAT_INTERVAL_MS)]
    heartbeat_interval_ms: u64,

    #[arg(long, env = "WHALEFS_SYNC_WORKERS", default_value_t = 2)]
    sync_workers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    match cli.command {
        Command::Master(args) => run_master(args).await,
        Command::Chunk(args) => run_chunk(args).await,
    }
}

async fn run_master(args: MasterArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => ClusterConfig::from_file(path)?,
        None => ClusterConfig::default(),
    };
    if let Some(block_size) = args.block_size {
        config.block_size = block_size;
    }
    if let Some(replication_factor) = args.replication_factor {
        config.replication_factor = replication_factor;
    }
    if let Some(interval) = args.heartbeat_interval_ms {
        config.heartbeat_interval_ms = interval;
    }
    config.validate()?;

    // 1. Coordinator and its background loops:
    let transport = Arc::new(HttpTransport::new(config.transfer_timeout()));
    let master = Master::new(config, transport);
    master.clone().start().await;

    // 2. HTTP server:
    let app = master_handlers::router(master);

    tracing::info!("Master listening on {}", args.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("cannot bind {}", args.bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_chunk(args: ChunkArgs) -> anyhow::Result<()> {
    let config = ChunkConfig {
        master_addr: args.master,
        advertise_addr: args.advertise.unwrap_or_else(|| args.bind.to_string()),
        data_dir: args.data_dir,
        heartbeat_interval_ms: args.heartbeat_interval_ms,
        sync_workers: args.sync_workers,
        ..Default::default()
    };
    config.validate()?;

    // 1. Local block store:
    let store: Arc<dyn BlockStore> = Arc::new(
        FsBlockStore::open(&config.data_dir)
            .await
            .with_context(|| format!("cannot open data dir {}", config.data_dir.display()))?,
    );
    tracing::info!(
        "Block store at {} holds {} blocks",
        config.data_dir.display(),
        store.list_blocks().await?.len()
    );

    // 2. Agent (heartbeat loop + sync workers):
    let master = Arc::new(HttpMasterClient::new(
        config.master_addr.clone(),
        config.heartbeat_timeout(),
    ));
    let transport = Arc::new(HttpTransport::new(config.transfer_timeout()));
    let agent = ChunkAgent::new(config, store.clone(), master, transport);
    agent.start().await;

    // 3. HTTP server for block transfers:
    let app = chunk_handlers::router(store);

    tracing::info!("Chunk server listening on {}", args.bind);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("cannot bind {}", args.bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}
