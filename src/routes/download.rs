use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::upscale::DownloadResponse;
use crate::routes::error::ApiError;

/// GET /download/{job_id}: time-limited URL for the upscaled result.
pub async fn get_download_url(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let download_url = state.jobs.download_url(job_id).await?;
    Ok(Json(DownloadResponse { download_url }))
}
