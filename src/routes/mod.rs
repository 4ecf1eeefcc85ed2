pub mod auth;
pub mod download;
pub mod error;
pub mod health;
pub mod metrics;
pub mod status;
pub mod upscale;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use health::WorkerHealth;

/// Router for the API service.
pub fn build_router(
    state: AppState,
    prometheus: Arc<PrometheusHandle>,
    max_upload_bytes: usize,
) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/upscale", post(upscale::submit_upscale))
        .route("/status/{job_id}", get(status::get_job_status))
        .route("/download/{job_id}", get(download::get_download_url))
        .with_state(state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .route_layer(middleware::from_fn(metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

/// Health and metrics router served by the worker process.
pub fn build_worker_router(info: WorkerHealth, prometheus: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::worker_health).with_state(info))
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
}
