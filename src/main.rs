use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use upscale_pipeline::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        auth::TokenVerifier, jobs::JobService, queue::AmqpJobQueue,
        status_store::RedisStatusStore, storage::S3Storage,
    },
    shutdown::shutdown_signal,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing upscale API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to Redis status store");
    let status_store = RedisStatusStore::new(&config.redis_url, config.status_ttl())
        .expect("Failed to initialize status store");

    tracing::info!("Initializing S3 storage client");
    let storage = S3Storage::new(
        &config.aws_default_region,
        config.aws_endpoint_url.as_deref(),
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
    )
    .expect("Failed to initialize S3 client")
    .with_public_endpoint(config.s3_public_endpoint.clone());

    let queue = AmqpJobQueue::connect(&config.rabbitmq_url, &config.queue_name, 1)
        .await
        .expect("Failed to connect to RabbitMQ");

    let auth = match config.jwt_secret.as_deref() {
        Some(secret) => {
            tracing::info!("Upload authentication enabled");
            Some(TokenVerifier::new(secret).expect("Invalid JWT_SECRET"))
        }
        None => {
            tracing::warn!("JWT_SECRET not set; uploads are accepted without authentication");
            None
        }
    };

    let jobs = JobService::new(
        Arc::new(storage),
        Arc::new(queue),
        Arc::new(status_store),
        config.s3_input_bucket.clone(),
        config.s3_output_bucket.clone(),
        config.download_url_ttl_secs,
    );
    let state = AppState::new(jobs, auth);

    let app = routes::build_router(state, prometheus_handle, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped");
}
