//! Upscale worker: drives each delivered job through
//! `processing -> {completed, failed}` and settles the queue message.

pub mod image_ops;
pub mod pool;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use strum::Display;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::models::job::{ImageSize, JobDescriptor, ObjectLocation, StatusRecord};
use crate::services::jobs::{output_key, OUTPUT_CONTENT_TYPE};
use crate::services::queue::{JobConsumer, QueueDelivery, QueueError};
use crate::services::status_store::{StatusStore, StatusStoreError};
use crate::services::storage::{ObjectStorage, StorageError};
use crate::services::upscaler::UpscaleError;

pub use pool::{PoolError, UpscalePool};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub output_bucket: String,
    pub max_input_dimension: u32,
    pub jpeg_quality: u8,
}

/// What the worker tells the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AckDecision {
    /// Processed; remove from the queue.
    Ack,
    /// Negative acknowledgment without requeue.
    Reject,
    /// Negative acknowledgment with requeue.
    Requeue,
}

/// Successful result of one processing attempt.
#[derive(Debug, Clone)]
pub struct Completion {
    pub output_location: ObjectLocation,
    pub original_size: ImageSize,
    pub output_size: ImageSize,
}

pub struct Worker {
    storage: Arc<dyn ObjectStorage>,
    status: Arc<dyn StatusStore>,
    pool: UpscalePool,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        status: Arc<dyn StatusStore>,
        pool: UpscalePool,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            storage,
            status,
            pool,
            settings,
        }
    }

    pub fn pool(&self) -> &UpscalePool {
        &self.pool
    }

    /// Consume deliveries until the stream ends or `shutdown` fires.
    ///
    /// The loop itself only pulls and dispatches; each delivery is handled on
    /// its own task and its CPU-bound steps go through the pool. At most
    /// `max_in_flight` deliveries are outstanding at once.
    pub async fn run(
        self: Arc<Self>,
        consumer: &dyn JobConsumer,
        max_in_flight: usize,
        shutdown: CancellationToken,
    ) -> Result<(), QueueError> {
        let mut deliveries = consumer.consume().await?;
        let slots = Arc::new(Semaphore::new(max_in_flight.max(1)));
        let mut tasks = JoinSet::new();
        let mut result = Ok(());

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let worker = self.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        worker.settle(delivery).await;
                    });
                }
                Some(Err(e)) => {
                    error!(error = %e, "Job queue consumer failed");
                    result = Err(e);
                    break;
                }
                None => {
                    info!("Job queue consumer ended");
                    break;
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Job task aborted");
                }
            }
        }

        info!(in_flight = tasks.len(), "Waiting for in-flight jobs");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Job task aborted");
            }
        }

        result
    }

    /// Handle one delivery and settle it with the broker.
    pub async fn settle(&self, delivery: QueueDelivery) {
        let span = info_span!(
            "Handling job delivery",
            redelivered = delivery.redelivered,
            job_id = tracing::field::Empty,
        );

        async {
            let decision = self.handle(&delivery.payload).await;
            let settled = match decision {
                AckDecision::Ack => delivery.acker.ack().await,
                AckDecision::Reject => delivery.acker.nack(false).await,
                AckDecision::Requeue => delivery.acker.nack(true).await,
            };

            metrics::counter!("upscale_deliveries_total", "decision" => decision.to_string())
                .increment(1);
            match settled {
                Ok(()) => info!(%decision, "Delivery settled"),
                // The broker redelivers anything left unsettled.
                Err(e) => error!(%decision, error = %e, "Failed to settle delivery"),
            }
        }
        .instrument(span)
        .await
    }

    /// Decode the payload, run the job and record its terminal state.
    pub async fn handle(&self, payload: &[u8]) -> AckDecision {
        let job = match JobDescriptor::from_bytes(payload) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Malformed job descriptor; rejecting without requeue");
                return AckDecision::Reject;
            }
        };
        tracing::Span::current().record("job_id", tracing::field::display(job.job_id));

        self.handle_job(&job).await
    }

    /// Run one processing attempt for `job` and write exactly one terminal record.
    pub async fn handle_job(&self, job: &JobDescriptor) -> AckDecision {
        let started_at = Utc::now();
        let clock = Instant::now();
        metrics::gauge!("upscale_jobs_in_flight").increment(1.0);

        info!(job_id = %job.job_id, input = %job.input_location, "Processing upscale job");
        let outcome = self.execute(job, started_at).await;

        let (record, decision) = match &outcome {
            Ok(done) => (
                StatusRecord::Completed {
                    progress: 100,
                    output_location: done.output_location.clone(),
                    created_at: job.created_at,
                    started_at,
                    completed_at: Utc::now(),
                    original_size: Some(done.original_size),
                    output_size: Some(done.output_size),
                    processing_time_secs: elapsed_secs(job.created_at),
                },
                AckDecision::Ack,
            ),
            Err(e) => (
                StatusRecord::Failed {
                    error: e.to_string(),
                    created_at: job.created_at,
                    started_at: Some(started_at),
                    failed_at: Utc::now(),
                },
                AckDecision::Reject,
            ),
        };

        metrics::gauge!("upscale_jobs_in_flight").decrement(1.0);
        metrics::histogram!("upscale_processing_seconds").record(clock.elapsed().as_secs_f64());

        match &outcome {
            Ok(done) => {
                metrics::counter!("upscale_jobs_completed_total").increment(1);
                info!(
                    event_type = "upscale_completion",
                    job_id = %job.job_id,
                    status = "completed",
                    output = %done.output_location,
                    processing_ms = clock.elapsed().as_millis() as u64,
                    "Job completed successfully"
                );
            }
            Err(e) => {
                metrics::counter!("upscale_jobs_failed_total", "reason" => e.reason())
                    .increment(1);
                error!(
                    event_type = "upscale_completion",
                    job_id = %job.job_id,
                    status = "failed",
                    reason = e.reason(),
                    retriable = e.is_retriable(),
                    error = %e,
                    "Job processing failed"
                );
            }
        }

        if let Err(e) = self.status.put(job.job_id, &record).await {
            // Nothing terminal was recorded; let the broker try again.
            error!(job_id = %job.job_id, error = %e, "Failed to write terminal status");
            return AckDecision::Requeue;
        }

        decision
    }

    /// Steps of one attempt: download, prepare, upscale, encode, upload.
    pub async fn execute(
        &self,
        job: &JobDescriptor,
        started_at: DateTime<Utc>,
    ) -> Result<Completion, ProcessingError> {
        let progress = Progress {
            status: self.status.as_ref(),
            job,
            started_at,
        };

        progress
            .begin(10, "downloading")
            .await
            .map_err(ProcessingError::StatusWrite)?;
        let data = self
            .storage
            .get(&job.input_location.bucket, &job.input_location.key)
            .await
            .map_err(ProcessingError::Download)?;

        progress.report(30, "loading").await;
        let max_dimension = self.settings.max_input_dimension;
        let prepared = self
            .pool
            .run(move || image_ops::prepare(&data, max_dimension))
            .await?
            .map_err(ProcessingError::Decode)?;

        if prepared.resized {
            info!(
                job_id = %job.job_id,
                width = prepared.original_size.width,
                height = prepared.original_size.height,
                max_dimension,
                "Resized large input before upscaling"
            );
            progress.report(40, "optimizing").await;
        }
        if prepared.flattened {
            progress.report(45, "converting").await;
        }

        progress.report(50, "upscaling").await;
        let model_start = Instant::now();
        let upscaled = self.pool.enhance(prepared.image).await?;
        info!(
            job_id = %job.job_id,
            model = self.pool.upscaler().name(),
            model_ms = model_start.elapsed().as_millis() as u64,
            "Upscaling complete"
        );

        progress.report(80, "encoding").await;
        let output_size = image_ops::size_of(&upscaled);
        let quality = self.settings.jpeg_quality;
        let encoded = self
            .pool
            .run(move || image_ops::encode_jpeg(&upscaled, quality))
            .await?
            .map_err(ProcessingError::Encode)?;

        progress.report(95, "uploading").await;
        let output_location =
            ObjectLocation::new(&self.settings.output_bucket, output_key(job.job_id));
        self.storage
            .put(
                &output_location.bucket,
                &output_location.key,
                &encoded,
                OUTPUT_CONTENT_TYPE,
            )
            .await
            .map_err(ProcessingError::Upload)?;

        Ok(Completion {
            output_location,
            original_size: prepared.original_size,
            output_size,
        })
    }
}

/// `processing` updates for one attempt. Only the first must land.
struct Progress<'a> {
    status: &'a dyn StatusStore,
    job: &'a JobDescriptor,
    started_at: DateTime<Utc>,
}

impl Progress<'_> {
    async fn begin(&self, progress: u8, stage: &str) -> Result<(), StatusStoreError> {
        self.status.put(self.job.job_id, &self.record(progress, stage)).await
    }

    async fn report(&self, progress: u8, stage: &str) {
        match self.status.put(self.job.job_id, &self.record(progress, stage)).await {
            Ok(()) => tracing::debug!(job_id = %self.job.job_id, progress, stage, "Progress"),
            Err(e) => warn!(job_id = %self.job.job_id, progress, stage, error = %e, "Progress update dropped"),
        }
    }

    fn record(&self, progress: u8, stage: &str) -> StatusRecord {
        StatusRecord::processing(progress, stage, self.job.created_at, self.started_at)
    }
}

fn elapsed_secs(since: DateTime<Utc>) -> f64 {
    (Utc::now() - since).num_milliseconds().max(0) as f64 / 1000.0
}

/// Anything that ends a processing attempt as `failed`.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Failed to record progress: {0}")]
    StatusWrite(#[source] StatusStoreError),

    #[error("Failed to download input: {0}")]
    Download(#[source] StorageError),

    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Upscaling failed: model invocation timeout after {}s", .0.as_secs_f64())]
    Timeout(std::time::Duration),

    #[error("Upscaling failed: {0}")]
    Model(#[source] UpscaleError),

    #[error("Processing task crashed: {0}")]
    Crashed(String),

    #[error("Failed to encode result: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Failed to upload result: {0}")]
    Upload(#[source] StorageError),
}

impl ProcessingError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ProcessingError::StatusWrite(_) => "status_write",
            ProcessingError::Download(_) => "download",
            ProcessingError::Decode(_) => "decode",
            ProcessingError::Timeout(_) => "timeout",
            ProcessingError::Model(_) => "model",
            ProcessingError::Crashed(_) => "crashed",
            ProcessingError::Encode(_) => "encode",
            ProcessingError::Upload(_) => "upload",
        }
    }

    /// Whether a later attempt could plausibly succeed. Logged only: every
    /// failure is rejected without requeue.
    pub fn is_retriable(&self) -> bool {
        match self {
            ProcessingError::StatusWrite(_) => true,
            ProcessingError::Download(StorageError::NotFound(_)) => false,
            ProcessingError::Download(_) | ProcessingError::Upload(_) => true,
            ProcessingError::Timeout(_) => true,
            ProcessingError::Model(UpscaleError::Http(_)) => true,
            ProcessingError::Model(_) => false,
            ProcessingError::Decode(_) | ProcessingError::Encode(_) => false,
            ProcessingError::Crashed(_) => false,
        }
    }
}

impl From<PoolError> for ProcessingError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Timeout(limit) => ProcessingError::Timeout(limit),
            PoolError::Model(e) => ProcessingError::Model(e),
            PoolError::Crashed(msg) => ProcessingError::Crashed(msg),
            PoolError::Closed => ProcessingError::Crashed("worker pool is closed".to_string()),
        }
    }
}
