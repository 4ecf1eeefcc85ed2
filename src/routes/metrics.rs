use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Count and time every request by method and matched route.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        "api_requests_total",
        "method" => method.clone(),
        "endpoint" => endpoint.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "api_request_duration_seconds",
        "method" => method,
        "endpoint" => endpoint
    )
    .record(elapsed);

    response
}

/// Register descriptions for the metrics both services emit.
pub fn describe_metrics() {
    metrics::describe_counter!("api_requests_total", "Total HTTP requests");
    metrics::describe_histogram!(
        "api_request_duration_seconds",
        "HTTP request latency in seconds"
    );
    metrics::describe_counter!("file_uploads_total", "Uploaded files by content type");
    metrics::describe_counter!(
        "upscale_jobs_submitted_total",
        "Total upscale jobs accepted and queued"
    );
    metrics::describe_counter!(
        "upscale_jobs_completed_total",
        "Total upscale jobs completed"
    );
    metrics::describe_counter!(
        "upscale_jobs_failed_total",
        "Total upscale jobs that failed, by reason"
    );
    metrics::describe_histogram!(
        "upscale_processing_seconds",
        "Time spent processing one upscale job"
    );
    metrics::describe_gauge!(
        "upscale_jobs_in_flight",
        "Upscale jobs currently being processed"
    );
    metrics::describe_counter!(
        "upscale_deliveries_total",
        "Queue deliveries settled, by decision"
    );
}
