//! Merger (§4.6): on a timer, compacts small per-ingest artifacts for each
//! projection into larger ones, garbage-collecting dead bytes along the way.
//! A no-op for the wide-column backend, whose rows are already merged.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use storage::catalog::Catalog;

#[derive(Parser, Debug)]
#[command(name = "merger")]
#[command(about = "Compacts small storage artifacts into larger ones")]
struct Args {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Run one merge pass and exit, instead of looping forever.
    #[arg(long)]
    once: bool,

    #[arg(long, default_value = "900")]
    interval_secs: u64,

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

    info!("starting merger");

    let catalog = Catalog::connect(&args.database_url).await?;
    let provider = storage::provider_from_env(catalog.pool()).await?;

    if args.once {
        run_pass(&provider, &catalog).await;
        return Ok(());
    }

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_tx.send(()).ok();
    });

    loop {
        run_pass(&provider, &catalog).await;

        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("merger shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(args.interval_secs)) => {}
        }
    }

    Ok(())
}

async fn run_pass(provider: &storage::BlobProvider, catalog: &Catalog) {
    info!("starting merge pass");
    match provider.merge(catalog).await {
        Ok(()) => info!("merge pass complete"),
        Err(e) => error!(error = %e, "merge pass failed"),
    }
}
