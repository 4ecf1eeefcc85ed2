use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use upscale_pipeline::{
    config::AppConfig,
    routes::{self, health::WorkerHealth},
    services::{
        queue::AmqpJobQueue,
        status_store::RedisStatusStore,
        storage::S3Storage,
        upscaler::{LanczosUpscaler, RemoteUpscaler, Upscaler},
    },
    shutdown::shutdown_signal,
    worker::{UpscalePool, Worker, WorkerSettings},
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

    tracing::info!("Starting upscale worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    // Initialize services
    tracing::info!("Initializing services");
    let status_store = RedisStatusStore::new(&config.redis_url, config.status_ttl())
        .expect("Failed to initialize status store");

    let storage = S3Storage::new(
        &config.aws_default_region,
        config.aws_endpoint_url.as_deref(),
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
    )
    .expect("Failed to initialize S3 client");

    let upscaler = build_upscaler(&config).await;
    let model_info = WorkerHealth {
        status: "healthy".to_string(),
        model: upscaler.name().to_string(),
        scale: upscaler.scale(),
    };

    let pool = UpscalePool::new(upscaler, config.worker_pool_size, config.model_timeout());
    match pool.warm_up().await {
        Ok(elapsed) => tracing::info!(
            model = %model_info.model,
            warm_up_ms = elapsed.as_millis() as u64,
            "Model warm-up complete"
        ),
        Err(e) => tracing::warn!(error = %e, "Model warm-up failed; continuing"),
    }

    // Never hold more unacknowledged deliveries than there are pool slots.
    let prefetch = u16::try_from(pool.size()).unwrap_or(u16::MAX);
    let queue = AmqpJobQueue::connect(&config.rabbitmq_url, &config.queue_name, prefetch)
        .await
        .expect("Failed to connect to RabbitMQ");

    let worker = Arc::new(Worker::new(
        Arc::new(storage),
        Arc::new(status_store),
        pool,
        WorkerSettings {
            output_bucket: config.s3_output_bucket.clone(),
            max_input_dimension: config.max_input_dimension,
            jpeg_quality: config.output_jpeg_quality,
        },
    ));

    let shutdown = CancellationToken::new();

    // Health and metrics listener
    let listener = tokio::net::TcpListener::bind(&config.worker_bind_addr)
        .await
        .expect("Failed to bind worker health address");
    tracing::info!("Worker health listening on {}", config.worker_bind_addr);
    let health_app = routes::build_worker_router(model_info, prometheus_handle);
    let health_shutdown = shutdown.clone();
    let health_server = tokio::spawn(async move {
        axum::serve(listener, health_app)
            .with_graceful_shutdown(async move { health_shutdown.cancelled().await })
            .await
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    tracing::info!(
        queue = %config.queue_name,
        pool_size = config.worker_pool_size,
        "Worker ready, consuming jobs"
    );

    let max_in_flight = worker.pool().size();
    if let Err(e) = worker.run(&queue, max_in_flight, shutdown.clone()).await {
        tracing::error!(error = %e, "Job consumer stopped with an error");
    }

    shutdown.cancel();
    match health_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Health server error"),
        Err(e) => tracing::error!(error = %e, "Health server task failed"),
    }

    tracing::info!("Worker stopped");
}

/// Remote model when `UPSCALER_URL` is set, local Lanczos resampling otherwise.
async fn build_upscaler(config: &AppConfig) -> Arc<dyn Upscaler> {
    let scale = config.upscale_factor;
    match config.upscaler_url.clone() {
        Some(endpoint) => {
            tracing::info!(%endpoint, scale, "Using remote upscaling model");
            let token = config.upscaler_api_token.clone();
            let timeout = config.model_timeout();
            // The blocking HTTP client owns a runtime thread; build it off the async executor.
            let remote = tokio::task::spawn_blocking(move || {
                RemoteUpscaler::new(endpoint, token, scale, timeout)
            })
            .await
            .expect("Upscaler setup task panicked")
            .expect("Failed to initialize remote upscaler");
            Arc::new(remote)
        }
        None => {
            tracing::info!(scale, "Using local Lanczos3 upscaling");
            Arc::new(LanczosUpscaler::new(scale))
        }
    }
}
