//! Worker (§4.9): drains the ingest queue and runs one task end-to-end
//! through the download/decode/derive/write pipeline, acking on success or
//! expiry and rescheduling on transient failure.

mod server;
mod spec;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use reqwest::Client;
use tokio::sync::{broadcast, Semaphore};
use tracing::{error, info, instrument, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ingestion::{run_task, IngestTask, TaskOutcome};
use storage::catalog::Catalog;
use storage::Queue;

use server::WorkerStats;
use spec::SpecCache;

const IDLE_POLL_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(about = "Drains the ingest queue and runs the download/decode/derive/write pipeline")]
struct Args {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum tasks processed concurrently.
    #[arg(long, default_value = "8")]
    concurrency: usize,

    #[arg(long, env = "STATUS_PORT", default_value = "8082")]
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

    info!("starting weather worker");

    let catalog = Catalog::connect(&args.database_url).await?;
    let queue = Queue::connect(&args.database_url).await?;
    queue.migrate().await?;
    let provider = Arc::new(storage::provider_from_env(catalog.pool()).await?);

    let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
    let spec_cache = Arc::new(SpecCache::new(catalog.clone()));
    let stats = Arc::new(WorkerStats::default());
    let semaphore = Arc::new(Semaphore::new(args.concurrency));

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

    if !args.no_status_server {
        let stats_clone = stats.clone();
        let port = args.status_port;
        tokio::spawn(async move {
            if let Err(e) = server::run_server(stats_clone, port).await {
                error!(error = %e, "status server failed");
            }
        });
    }

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_tx.send(()).ok();
    });

    loop {
        if shutdown_rx.try_recv().is_ok() {
            info!("worker shutting down");
            break;
        }

        let lease = match queue.dequeue::<IngestTask>().await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tokio::time::sleep(IDLE_POLL_DELAY).await;
                continue;
            }
            Err(e) => {
                error!(error = %e, "dequeue failed");
                tokio::time::sleep(IDLE_POLL_DELAY).await;
                continue;
            }
        };

        let permit = semaphore.clone().acquire_owned().await?;
        let catalog = catalog.clone();
        let provider = provider.clone();
        let client = client.clone();
        let queue = queue.clone();
        let spec_cache = spec_cache.clone();
        let stats = stats.clone();

        tokio::spawn(async move {
            let _permit = permit;
            process_one(&client, &catalog, &provider, &queue, &spec_cache, &stats, lease).await;
        });
    }

    Ok(())
}

#[instrument(skip_all, fields(source_id = lease.task.source_id, valid_time = %lease.task.valid_time))]
async fn process_one(
    client: &Client,
    catalog: &Catalog,
    provider: &storage::BlobProvider,
    queue: &Queue,
    spec_cache: &SpecCache,
    stats: &WorkerStats,
    lease: storage::Lease<IngestTask>,
) {
    let spec = match spec_cache.get(lease.task.source_id).await {
        Ok(spec) => spec,
        Err(e) => {
            warn!(error = %e, "could not build ingest spec; rescheduling");
            queue.reschedule(lease.ack_token, chrono::Duration::minutes(5)).await.ok();
            return;
        }
    };

    let outcome = run_task(client, catalog, provider, &lease.task, &spec).await;

    match outcome {
        Ok(TaskOutcome::Done) => {
            stats.done.fetch_add(1, Ordering::Relaxed);
            queue.ack(lease.ack_token).await.ok();
        }
        Ok(TaskOutcome::Expired) => {
            stats.expired.fetch_add(1, Ordering::Relaxed);
            queue.ack(lease.ack_token).await.ok();
        }
        Ok(TaskOutcome::Transient { delay }) => {
            stats.rescheduled.fetch_add(1, Ordering::Relaxed);
            queue.reschedule(lease.ack_token, delay).await.ok();
        }
        Err(e) => {
            error!(error = %e, "task construction error, dropping");
            queue.ack(lease.ack_token).await.ok();
        }
    }
}
