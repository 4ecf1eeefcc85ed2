use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Lifecycle state of an upscale job as seen by polling clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Bucket + key reference to an object in storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Message carried on the job queue. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDescriptor {
    pub job_id: Uuid,
    pub input_location: ObjectLocation,
    pub filename: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl JobDescriptor {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Value stored under `job:{job_id}`.
///
/// Always written whole; the variant decides which fields exist, so an
/// `output_location` only ever appears on a completed record and an `error`
/// only on a failed one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusRecord {
    Queued {
        created_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    Processing {
        progress: u8,
        stage: String,
        created_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    },
    Completed {
        progress: u8,
        output_location: ObjectLocation,
        created_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_size: Option<ImageSize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_size: Option<ImageSize>,
        processing_time_secs: f64,
    },
    Failed {
        error: String,
        created_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
        failed_at: DateTime<Utc>,
    },
}

impl StatusRecord {
    pub fn queued(created_at: DateTime<Utc>, filename: impl Into<String>) -> Self {
        StatusRecord::Queued {
            created_at,
            filename: Some(filename.into()),
        }
    }

    pub fn processing(
        progress: u8,
        stage: impl Into<String>,
        created_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Self {
        StatusRecord::Processing {
            progress: progress.min(100),
            stage: stage.into(),
            created_at,
            started_at,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            StatusRecord::Queued { .. } => JobStatus::Queued,
            StatusRecord::Processing { .. } => JobStatus::Processing,
            StatusRecord::Completed { .. } => JobStatus::Completed,
            StatusRecord::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn progress(&self) -> Option<u8> {
        match self {
            StatusRecord::Processing { progress, .. } | StatusRecord::Completed { progress, .. } => {
                Some(*progress)
            }
            _ => None,
        }
    }

    pub fn output_location(&self) -> Option<&ObjectLocation> {
        match self {
            StatusRecord::Completed {
                output_location, ..
            } => Some(output_location),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StatusRecord::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}
