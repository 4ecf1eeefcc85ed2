use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::upscale::StatusResponse;
use crate::routes::error::ApiError;

/// GET /status/{job_id}: current status record, 404 once absent or expired.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let record = state.jobs.status(job_id).await?;
    Ok(Json(StatusResponse { job_id, record }))
}
