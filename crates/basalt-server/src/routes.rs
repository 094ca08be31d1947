//! HTTP handlers for the metrics and health endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde_json::json;
use tower_http::cors::CorsLayer;

use basalt_core::METRICS;

/// Readiness probe: true while the worker pool is fully up.
pub type ReadyCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Shared state for the observability routes.
pub struct AppState {
    pub started_at: Instant,
    pub ready: ReadyCheck,
}

impl AppState {
    pub fn new(ready: ReadyCheck) -> Self {
        Self {
            started_at: Instant::now(),
            ready,
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler))
        .route("/readyz", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn metrics_handler() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.exposition_text(),
    )
        .into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> Response {
    if (state.ready)() {
        (StatusCode::OK, Json(json!({ "ready": true }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false })),
        )
            .into_response()
    }
}
