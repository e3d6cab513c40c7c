//! Cleaner (§4.7): on a timer, drops expired bands, prunes superseded
//! runs, and removes orphaned storage objects.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use storage::catalog::Catalog;

#[derive(Parser, Debug)]
#[command(name = "cleaner")]
#[command(about = "Drops expired bands and orphaned storage artifacts")]
struct Args {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Run one cleaning pass and exit, instead of looping forever.
    #[arg(long)]
    once: bool,

    #[arg(long, default_value = "3600")]
    interval_secs: u64,

    /// How far back data is retained, per §6.4 `RETENTION_HOURS`.
    #[arg(long, env = "RETENTION_HOURS", default_value = "24")]
    retention_hours: i64,

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

    info!(retention_hours = args.retention_hours, "starting cleaner");

    let catalog = Catalog::connect(&args.database_url).await?;
    let provider = storage::provider_from_env(catalog.pool()).await?;
    let retention = chrono::Duration::hours(args.retention_hours);

    if args.once {
        run_pass(&provider, &catalog, retention).await;
        return Ok(());
    }

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_tx.send(()).ok();
    });

    loop {
        run_pass(&provider, &catalog, retention).await;

        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("cleaner shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(args.interval_secs)) => {}
        }
    }

    Ok(())
}

async fn run_pass(provider: &storage::BlobProvider, catalog: &Catalog, retention: chrono::Duration) {
    info!("starting clean pass");
    match provider.clean(catalog, retention).await {
        Ok(()) => info!("clean pass complete"),
        Err(e) => error!(error = %e, "clean pass failed"),
    }
}
