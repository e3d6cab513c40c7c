//! Minimal status API for the worker process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{extract::Extension, response::Json, routing::get, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Default)]
pub struct WorkerStats {
    pub done: AtomicU64,
    pub expired: AtomicU64,
    pub rescheduled: AtomicU64,
}

pub fn create_router(stats: Arc<WorkerStats>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(Extension(stats))
}

async fn status_handler(Extension(stats): Extension<Arc<WorkerStats>>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "worker",
        "done": stats.done.load(Ordering::Relaxed),
        "expired": stats.expired.load(Ordering::Relaxed),
        "rescheduled": stats.rescheduled.load(Ordering::Relaxed),
    }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "worker" }))
}

pub async fn run_server(stats: Arc<WorkerStats>, port: u16) -> anyhow::Result<()> {
    let app = create_router(stats);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "starting worker status server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
