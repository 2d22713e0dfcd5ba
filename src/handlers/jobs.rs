use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::jobs::StoredResult;
use crate::models::JobStatusResponse;
use crate::state::AppState;

// GET /api/v1/jobs/{id}
pub async fn job_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.orchestrator.status(id).await?;
    Ok(Json(job.into()))
}

// GET /api/v1/jobs - newest first
pub async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<JobStatusResponse>>, ApiError> {
    let jobs = state.orchestrator.list_jobs().await?;
    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

// GET /api/v1/results/{id}
pub async fn get_result_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StoredResult>, ApiError> {
    Ok(Json(state.orchestrator.result(id).await?))
}
