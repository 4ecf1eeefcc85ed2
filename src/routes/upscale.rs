use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::job::JobStatus;
use crate::models::upscale::{UpscaleResponse, UploadedFile};
use crate::routes::auth::Uploader;
use crate::routes::error::ApiError;

const FILE_FIELD: &str = "file";

/// Body over the configured limit is a 413; anything else is a malformed request.
fn multipart_error(context: &str, e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("File exceeds upload limit: {}", e.body_text()))
    } else {
        ApiError::BadRequest(format!("{context}: {e}"))
    }
}

/// POST /upscale: stage an image and queue it for upscaling.
pub async fn submit_upscale(
    State(state): State<AppState>,
    uploader: Uploader,
    mut multipart: Multipart,
) -> Result<Json<UpscaleResponse>, ApiError> {
    let mut upload: Option<UploadedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Invalid multipart body", e))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error("Failed to read file", e))?;

        upload = Some(UploadedFile {
            filename,
            content_type,
            data: data.to_vec(),
        });
    }

    let upload = upload.ok_or_else(|| ApiError::BadRequest("No file provided".into()))?;
    upload
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Invalid upload: {e}")))?;

    metrics::counter!("file_uploads_total", "file_type" => upload.content_type.clone())
        .increment(1);

    let job = state
        .jobs
        .submit(
            &upload.data,
            &upload.filename,
            &upload.content_type,
            uploader.user_id(),
        )
        .await?;

    Ok(Json(UpscaleResponse {
        job_id: job.job_id,
        status: JobStatus::Queued,
        input_file: job.filename,
    }))
}
