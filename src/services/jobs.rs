use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::{JobDescriptor, ObjectLocation, StatusRecord};
use crate::services::queue::{JobPublisher, QueueError};
use crate::services::status_store::{StatusStore, StatusStoreError};
use crate::services::storage::{ObjectStorage, StorageError};

/// Name of the result object inside `output/{job_id}/`.
pub const OUTPUT_FILENAME: &str = "upscaled.jpg";
pub const OUTPUT_CONTENT_TYPE: &str = "image/jpeg";

/// Deterministic key of a staged input.
pub fn input_key(job_id: Uuid, filename: &str) -> String {
    format!("input/{job_id}/{}", sanitize_filename(filename))
}

/// Deterministic key of a job's result; redeliveries overwrite the same object.
pub fn output_key(job_id: Uuid) -> String {
    format!("output/{job_id}/{OUTPUT_FILENAME}")
}

/// Keep only the last path component and a conservative character set.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// A job accepted by [`JobService::submit`].
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub job_id: Uuid,
    pub input_location: ObjectLocation,
    pub filename: String,
}

/// Submission and status/download side of the job lifecycle.
pub struct JobService {
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<dyn JobPublisher>,
    status: Arc<dyn StatusStore>,
    input_bucket: String,
    output_bucket: String,
    download_url_ttl_secs: u32,
}

impl JobService {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn JobPublisher>,
        status: Arc<dyn StatusStore>,
        input_bucket: impl Into<String>,
        output_bucket: impl Into<String>,
        download_url_ttl_secs: u32,
    ) -> Self {
        Self {
            storage,
            queue,
            status,
            input_bucket: input_bucket.into(),
            output_bucket: output_bucket.into(),
            download_url_ttl_secs,
        }
    }

    pub fn status_store(&self) -> &dyn StatusStore {
        self.status.as_ref()
    }

    pub fn publisher(&self) -> &dyn JobPublisher {
        self.queue.as_ref()
    }

    /// Stage the input, record the job as queued and publish its descriptor.
    ///
    /// The input object is fully written before anything references it. The
    /// queued record is written before publishing so a fast worker's
    /// `processing` write can never be overwritten by it.
    #[tracing::instrument(name = "Submitting upscale job", skip(self, data), fields(size = data.len()))]
    pub async fn submit(
        &self,
        data: &[u8],
        filename: &str,
        content_type: &str,
        user_id: Option<String>,
    ) -> Result<SubmittedJob, JobError> {
        let job_id = Uuid::new_v4();
        let created_at = Utc::now();
        let input_location = ObjectLocation::new(&self.input_bucket, input_key(job_id, filename));

        self.storage
            .put(&input_location.bucket, &input_location.key, data, content_type)
            .await
            .map_err(JobError::UploadFailure)?;

        self.status
            .put(job_id, &StatusRecord::queued(created_at, filename))
            .await
            .map_err(JobError::StatusUnavailable)?;

        let descriptor = JobDescriptor {
            job_id,
            input_location: input_location.clone(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            created_at,
            user_id: user_id.clone(),
        };

        if let Err(e) = self.queue.publish(&descriptor).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to publish job descriptor");
            self.abandon(job_id, created_at, &input_location, &e).await;
            return Err(JobError::QueuePublishFailure(e));
        }

        metrics::counter!("upscale_jobs_submitted_total").increment(1);
        tracing::info!(
            event_type = "upscale_request",
            job_id = %job_id,
            user_id = user_id.as_deref().unwrap_or("anonymous"),
            file_size = data.len(),
            file_type = content_type,
            "Job queued"
        );

        Ok(SubmittedJob {
            job_id,
            input_location,
            filename: filename.to_string(),
        })
    }

    /// Best-effort cleanup after a failed publish: the job can never run, so
    /// say so to pollers and drop the staged input.
    async fn abandon(
        &self,
        job_id: Uuid,
        created_at: chrono::DateTime<Utc>,
        input: &ObjectLocation,
        cause: &QueueError,
    ) {
        let record = StatusRecord::Failed {
            error: format!("Queue publish failed: {cause}"),
            created_at,
            started_at: None,
            failed_at: Utc::now(),
        };
        if let Err(e) = self.status.put(job_id, &record).await {
            tracing::warn!(job_id = %job_id, error = %e, "Could not record publish failure");
        }
        match self.storage.delete(&input.bucket, &input.key).await {
            Ok(()) => tracing::info!(job_id = %job_id, input = %input, "Removed orphaned input"),
            Err(e) => {
                tracing::warn!(job_id = %job_id, input = %input, error = %e, "Orphaned input left in storage")
            }
        }
    }

    /// Current status record; expired and unknown jobs are both `JobNotFound`.
    pub async fn status(&self, job_id: Uuid) -> Result<StatusRecord, JobError> {
        self.status
            .get(job_id)
            .await
            .map_err(JobError::StatusUnavailable)?
            .ok_or(JobError::JobNotFound(job_id))
    }

    /// Presigned URL for the job's result object.
    ///
    /// Does not consult the status store: callers are expected to poll until
    /// `completed` before asking for the download.
    pub async fn download_url(&self, job_id: Uuid) -> Result<String, JobError> {
        self.storage
            .presign_get(
                &self.output_bucket,
                &output_key(job_id),
                self.download_url_ttl_secs,
            )
            .await
            .map_err(|e| {
                tracing::warn!(job_id = %job_id, error = %e, "Could not presign download");
                JobError::JobNotFound(job_id)
            })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Upload failed: {0}")]
    UploadFailure(#[source] StorageError),

    #[error("Queue publish failed: {0}")]
    QueuePublishFailure(#[source] QueueError),

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Status store unavailable: {0}")]
    StatusUnavailable(#[source] StatusStoreError),
}
