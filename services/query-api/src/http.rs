//! §6.3's read-only HTTP surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use storage::catalog::{Catalog, Metric, Source, SourceField};
use weather_common::WeatherError;

use crate::query::QueryEngine;

pub struct ApiState {
    pub catalog: Catalog,
    pub engine: QueryEngine,
}

pub fn create_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/sources", get(list_sources))
        .route("/source/:id", get(get_source))
        .route("/metrics", get(list_metrics))
        .route("/location/search", get(search_locations))
        .route("/wx", get(query_wx))
        .route("/health", get(health))
        .layer(cors)
        .layer(Extension(state))
}

/// A thin wrapper so `WeatherError` surfaces with the HTTP status §7 assigns
/// it, instead of every handler hand-rolling the mapping.
struct ApiError(WeatherError);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.0.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<WeatherError> for ApiError {
    fn from(err: WeatherError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize)]
struct SourceResponse {
    #[serde(flatten)]
    source: Source,
    fields: Vec<SourceField>,
}

async fn list_sources(Extension(state): Extension<Arc<ApiState>>) -> Result<Json<Vec<SourceResponse>>, ApiError> {
    let sources = state.catalog.list_sources().await?;
    let mut out = Vec::with_capacity(sources.len());
    for source in sources {
        let fields = state.catalog.source_fields_for_source(source.id).await?;
        out.push(SourceResponse { source, fields });
    }
    Ok(Json(out))
}

async fn get_source(
    Extension(state): Extension<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Json<SourceResponse>, ApiError> {
    let sources = state.catalog.list_sources().await?;
    let source = sources
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| WeatherError::InvalidParameter { param: "id".to_string(), message: "no such source".to_string() })?;
    let fields = state.catalog.source_fields_for_source(source.id).await?;
    Ok(Json(SourceResponse { source, fields }))
}

async fn list_metrics(Extension(state): Extension<Arc<ApiState>>) -> Result<Json<Vec<Metric>>, ApiError> {
    Ok(Json(state.catalog.list_metrics().await?))
}

#[derive(Deserialize)]
struct LocationSearchParams {
    q: String,
}

async fn search_locations(
    Extension(state): Extension<Arc<ApiState>>,
    Query(params): Query<LocationSearchParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if params.q.trim().len() < 2 {
        return Err(WeatherError::InvalidParameter {
            param: "q".to_string(),
            message: "search query must be at least 2 characters".to_string(),
        }
        .into());
    }
    let locations = state.catalog.search_locations(params.q.trim(), 10).await?;
    Ok(Json(json!(locations)))
}

#[derive(Deserialize)]
struct WxParams {
    lat: f64,
    lon: f64,
    start: i64,
    end: i64,
    metrics: Option<String>,
}

#[derive(Serialize)]
struct WxPoint {
    run_time: Option<i64>,
    src_field_id: Option<i64>,
    value: f32,
}

#[derive(Serialize)]
struct WxResponse {
    data: BTreeMap<i64, Vec<WxPoint>>,
    ordered_times: Vec<i64>,
}

async fn query_wx(
    Extension(state): Extension<Arc<ApiState>>,
    Query(params): Query<WxParams>,
) -> Result<Json<WxResponse>, ApiError> {
    if !(-90.0..=90.0).contains(&params.lat) || !(-180.0..=180.0).contains(&params.lon) {
        return Err(WeatherError::InvalidParameter {
            param: "lat/lon".to_string(),
            message: "out of range".to_string(),
        }
        .into());
    }

    let start = parse_unix_seconds("start", params.start)?;
    let end = parse_unix_seconds("end", params.end)?;
    let metric_ids = parse_metric_ids(params.metrics.as_deref())?;

    let points = state.engine.query(params.lat, params.lon, start, end, &metric_ids).await?;

    let mut data: BTreeMap<i64, Vec<WxPoint>> = BTreeMap::new();
    let mut ordered_times = Vec::new();
    for point in points {
        let unix_ts = point.valid_time.timestamp();
        if !data.contains_key(&unix_ts) {
            ordered_times.push(unix_ts);
        }
        data.entry(unix_ts).or_default().push(WxPoint {
            run_time: point.run_time.map(|t| t.timestamp()),
            src_field_id: point.source_field_id,
            value: point.values.first().copied().unwrap_or(f32::NAN),
        });
    }

    Ok(Json(WxResponse { data, ordered_times }))
}

fn parse_unix_seconds(param: &str, secs: i64) -> Result<DateTime<Utc>, WeatherError> {
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| WeatherError::InvalidParameter {
        param: param.to_string(),
        message: "not a valid unix timestamp".to_string(),
    })
}

fn parse_metric_ids(raw: Option<&str>) -> Result<Vec<i64>, WeatherError> {
    match raw {
        None => Ok(Vec::new()),
        Some(s) if s.trim().is_empty() => Ok(Vec::new()),
        Some(s) => s
            .split(',')
            .map(|part| {
                part.trim().parse::<i64>().map_err(|_| WeatherError::InvalidParameter {
                    param: "metrics".to_string(),
                    message: format!("'{part}' is not an integer metric id"),
                })
            })
            .collect(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "query-api" }))
}

pub async fn run_server(state: Arc<ApiState>, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(port, "starting query-api");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
