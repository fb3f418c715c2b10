//! Command line entry point for the block pump and the supply process.

use chainpump_db::{DbPool, EventLog, SupplyStore};
use chainpump_ingestion::model::ChainFamily;
use chainpump_ingestion::mempool::MempoolWatcher;
use chainpump_ingestion::pump::resume_height;
use chainpump_ingestion::{
    BitcoinJsonRpcClient, BlockFetchStep, BlockWalker, BusPublisher, ChainRpc,
    EthereumJsonRpcClient, Pump, PumpConfig,
};
use chainpump_supply::SupplyRecalculationProcess;
use chainpump_telemetry::{init_logging, Metrics, Timing};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "chainpump")]
#[command(about = "Ordered block and transaction pump for Bitcoin and Ethereum nodes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the configured chain and publish every block to the bus
    Pump {
        /// Metrics bind address
        #[arg(long, default_value = "0.0.0.0:9090")]
        metrics_bind_address: String,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Recalculate circulating supply from the published blocks
    Supply {
        /// Metrics bind address
        #[arg(long, default_value = "0.0.0.0:9091")]
        metrics_bind_address: String,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Pump {
            metrics_bind_address,
            log_level,
        } => {
            init_logging(log_level.as_deref())?;
            run_pump(&metrics_bind_address).await?;
        }
        Commands::Supply {
            metrics_bind_address,
            log_level,
        } => {
            init_logging(log_level.as_deref())?;
            run_supply(&metrics_bind_address).await?;
        }
    }

    Ok(())
}

async fn open_database(config: &PumpConfig) -> anyhow::Result<DbPool> {
    info!(
        "Using event log at {} (brokers configured: {})",
        config.bus_database_path, config.kafka_brokers
    );
    let db = DbPool::new(&config.bus_database_path).await?;
    db.migrate().await?;
    Ok(db)
}

async fn run_pump(metrics_addr: &str) -> anyhow::Result<()> {
    let config = PumpConfig::from_env()?;
    info!(
        "Starting {} pump against {}",
        config.chain.name, config.chain.node_url
    );

    let log = Arc::new(EventLog::new(open_database(&config).await?));
    let metrics = Metrics::new()?;
    start_metrics_server(metrics_addr, metrics.clone()).await?;

    let start = resolve_start_height(&config, &log).await?;
    let shutdown = shutdown_signal();
    let client = reqwest::Client::new();
    let timing: Arc<dyn Timing> = Arc::new(metrics.clone());

    match config.chain.family {
        ChainFamily::Bitcoin => {
            let rpc = Arc::new(BitcoinJsonRpcClient::new(
                client,
                &config.chain,
                timing,
                config.tx_download_concurrency(),
            ));
            if config.with_mempool {
                let watcher = MempoolWatcher::new(
                    rpc.clone(),
                    log.clone(),
                    config.chain.clone(),
                    config.mempool_poll_interval,
                );
                tokio::spawn(watcher.run(shutdown.clone()));
            }
            pump_chain(rpc, &config, start, log, metrics, shutdown).await
        }
        ChainFamily::Ethereum => {
            if config.with_mempool {
                warn!(
                    "Mempool watching is only available for Bitcoin-family chains, ignoring it for {}",
                    config.chain.name
                );
            }
            let rpc = Arc::new(EthereumJsonRpcClient::new(
                client,
                &config.chain,
                timing,
                config.tx_download_concurrency(),
            ));
            pump_chain(rpc, &config, start, log, metrics, shutdown).await
        }
    }
}

async fn pump_chain<R: ChainRpc + 'static>(
    rpc: Arc<R>,
    config: &PumpConfig,
    start: u64,
    log: Arc<EventLog>,
    metrics: Metrics,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let source = BlockFetchStep::new(rpc, config.chain.name.clone(), config.use_batch);
    let walker = BlockWalker::new(source, start, config.max_retries);
    let publisher = BusPublisher::new(log, config.chain.clone());

    let next = Pump::new(walker, publisher, metrics, config.tip_poll_interval, shutdown)
        .run()
        .await?;
    info!("{} pump stopped, next block is {}", config.chain.name, next);
    Ok(())
}

/// Configured start height, never rewinding over blocks already published.
async fn resolve_start_height(config: &PumpConfig, log: &EventLog) -> anyhow::Result<u64> {
    let start = resume_height(
        log,
        &config.chain.block_pump_topic(),
        config.start_block_number,
    )
    .await?;
    info!("Starting from block {}", start);
    Ok(start)
}

async fn run_supply(metrics_addr: &str) -> anyhow::Result<()> {
    let config = PumpConfig::from_env()?;
    info!("Starting {} supply process", config.chain.name);

    let db = open_database(&config).await?;
    let metrics = Metrics::new()?;
    start_metrics_server(metrics_addr, metrics.clone()).await?;

    let process = SupplyRecalculationProcess::new(
        EventLog::new(db.clone()),
        SupplyStore::new(db),
        &config.chain,
        config.genesis_supply,
        config.max_poll_records,
        metrics,
    );
    let state = process.run(shutdown_signal()).await?;
    info!(
        "Supply of {} is {} at block {}",
        state.kind, state.total_supply, state.block_number
    );
    Ok(())
}

/// Flips to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing the current step");
                let _ = tx.send(true);
            }
            Err(e) => error!("Cannot listen for shutdown signal: {}", e),
        }
    });
    rx
}

async fn start_metrics_server(addr: &str, metrics: Metrics) -> anyhow::Result<()> {
    use axum::{
        extract::State,
        http::StatusCode,
        response::IntoResponse,
        routing::get,
        Router,
    };

    let metrics = Arc::new(metrics);

    async fn metrics_handler(
        State(metrics): State<Arc<Metrics>>,
    ) -> Result<impl IntoResponse, StatusCode> {
        match metrics.gather() {
            Ok(body) => Ok((StatusCode::OK, body)),
            Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}
