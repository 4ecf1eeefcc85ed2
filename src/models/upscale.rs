use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobStatus, StatusRecord};

/// File part of a `POST /upscale` upload, validated before it is staged.
#[derive(Debug, Validate)]
pub struct UploadedFile {
    #[garde(length(min = 1, max = 255))]
    pub filename: String,

    #[garde(length(min = 1, max = 127))]
    pub content_type: String,

    #[garde(length(min = 1))]
    pub data: Vec<u8>,
}

/// Response after submitting an image for upscaling.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpscaleResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub input_file: String,
}

/// Response for `GET /status/{job_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub record: StatusRecord,
}

/// Response for `GET /download/{job_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub download_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
