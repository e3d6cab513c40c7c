//! Query API (§4.8, §6.3): read-only HTTP surface over the Catalog and blob
//! store for the out-of-scope front-end.

mod http;
mod query;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use storage::catalog::Catalog;

use http::ApiState;
use query::QueryEngine;

#[derive(Parser, Debug)]
#[command(name = "query-api")]
#[command(about = "Read-only HTTP surface over the weather catalog and blob store")]
struct Args {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "QUERY_API_PORT", default_value = "8080")]
    port: u16,

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

    info!("starting query-api");

    let catalog = Catalog::connect(&args.database_url).await?;
    let provider = Arc::new(storage::provider_from_env(catalog.pool()).await?);
    let engine = QueryEngine::new(catalog.clone(), provider);
    let state = Arc::new(ApiState { catalog, engine });

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_tx.send(()).ok();
    });

    tokio::select! {
        result = http::run_server(state, args.port) => result?,
        _ = shutdown_rx.recv() => info!("query-api shutting down"),
    }

    Ok(())
}
