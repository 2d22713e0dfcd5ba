use axum::http::StatusCode;
use axum::{Json, extract::State};
use std::sync::Arc;
use std::time::Instant;

use crate::error::ApiError;
use crate::jobs::{JobStatus, JobType, StoredResult};
use crate::metrics::{REQUEST_LATENCY, REQUEST_TOTAL};
use crate::models::{GeneratePortfolioRequest, JobCreatedResponse};
use crate::state::AppState;

use super::respond_sync;

fn validated_username(payload: GeneratePortfolioRequest) -> Result<String, ApiError> {
    let username = payload.github_username.trim().to_string();
    if username.is_empty() {
        return Err(ApiError::InvalidRequest(
            "githubUsername must not be blank".into(),
        ));
    }
    Ok(username)
}

// POST /api/v1/portfolio/generate - synchronous variant
pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GeneratePortfolioRequest>,
) -> Result<Json<StoredResult>, ApiError> {
    REQUEST_TOTAL.inc();
    let username = validated_username(payload)?;

    let start_time = Instant::now();
    let outcome = state
        .orchestrator
        .submit_and_wait(JobType::PortfolioGeneration, username, state.sync_timeout)
        .await?;
    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());

    respond_sync(&state, outcome).await
}

// POST /api/v1/portfolio/generate/async - 202 plus a pollable job id
pub async fn generate_async_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GeneratePortfolioRequest>,
) -> Result<(StatusCode, Json<JobCreatedResponse>), ApiError> {
    REQUEST_TOTAL.inc();
    let username = validated_username(payload)?;

    let job = state
        .orchestrator
        .submit(JobType::PortfolioGeneration, username)
        .await?;

    let message = if job.status == JobStatus::Completed {
        "A recent portfolio for this user already exists; fetch it via its result reference."
    } else {
        "Portfolio generation started. Poll the job status endpoint for progress."
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            job_id: job.id,
            status: job.status,
            message: message.to_string(),
        }),
    ))
}
