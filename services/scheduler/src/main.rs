//! Per-source scheduler (§4.1): computes each source's canonical run_time
//! and enqueues one ingest task per forecast horizon hour, scheduled for
//! the source's publish lag.

mod config;
mod scheduler;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use storage::catalog::Catalog;
use storage::Queue;

#[derive(Parser, Debug)]
#[command(name = "scheduler")]
#[command(about = "Enqueues ingest tasks for every configured weather source")]
struct Args {
    /// Run one scheduling pass and exit, instead of polling forever.
    #[arg(long)]
    once: bool,

    /// Directory containing sources/*.yaml schedule definitions.
    #[arg(long, env = "CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "STATUS_PORT", default_value = "8081")]
    status_port: u16,

    #[arg(long)]
    no_status_server: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_target(true).json().finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting weather scheduler");

    let catalog = Catalog::connect(&args.database_url).await?;
    let queue = Queue::connect(&args.database_url).await?;
    queue.migrate().await?;

    let sources = config::load_source_schedules(&args.config_dir)?;
    if sources.is_empty() {
        tracing::warn!("no source schedules loaded; scheduler will idle");
    }

    let scheduler = Arc::new(scheduler::Scheduler::new(catalog, queue.clone(), sources));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    if !args.no_status_server && !args.once {
        let server_state = Arc::new(server::ServerState { scheduler: scheduler.clone(), queue: queue.clone() });
        let port = args.status_port;
        tokio::spawn(async move {
            if let Err(e) = server::run_server(server_state, port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    if args.once {
        scheduler.poll_once().await?;
    } else {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("received shutdown signal");
            shutdown_tx_clone.send(()).ok();
        });

        scheduler.run_forever(shutdown_tx.subscribe()).await?;
    }

    Ok(())
}
