//! Status API: lets an operator see what each source's last scheduled
//! run_time was and the depth of the work queue it feeds.

use std::sync::Arc;

use axum::{extract::Extension, response::Json, routing::get, Router};
use serde::Serialize;
use storage::Queue;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::scheduler::Scheduler;

pub struct ServerState {
    pub scheduler: Arc<Scheduler>,
    pub queue: Queue,
}

#[derive(Serialize)]
struct StatusResponse {
    service: &'static str,
    queue_depth: i64,
    sources: Vec<SourceStatusResponse>,
}

#[derive(Serialize)]
struct SourceStatusResponse {
    source: String,
    last_run_time: Option<String>,
}

pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(Extension(state))
}

async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> Json<StatusResponse> {
    let queue_depth = state.queue.queue_depth().await.unwrap_or(-1);
    let sources = state
        .scheduler
        .statuses()
        .await
        .into_iter()
        .map(|s| SourceStatusResponse {
            source: s.source_short_name,
            last_run_time: s.last_run_time.map(|t| t.to_rfc3339()),
        })
        .collect();

    Json(StatusResponse { service: "scheduler", queue_depth, sources })
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": "scheduler" }))
}

pub async fn run_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "starting scheduler status server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
