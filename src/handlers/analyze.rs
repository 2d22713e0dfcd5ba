use axum::{Json, extract::State};
use std::sync::Arc;
use std::time::Instant;

use crate::error::ApiError;
use crate::github;
use crate::jobs::{JobType, StoredResult};
use crate::metrics::{REQUEST_LATENCY, REQUEST_TOTAL};
use crate::models::AnalyzeRepoRequest;
use crate::state::AppState;

use super::respond_sync;

// POST /api/v1/repos/analyze - runs the analysis inline, bounded by the
// configured deadline; on timeout the job keeps running and the client
// gets the id to poll
pub async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AnalyzeRepoRequest>,
) -> Result<Json<StoredResult>, ApiError> {
    REQUEST_TOTAL.inc();

    // reject malformed URLs before a job record exists
    github::parse_repo_url(&payload.repo_url)?;

    let start_time = Instant::now();
    let outcome = state
        .orchestrator
        .submit_and_wait(JobType::RepoAnalysis, payload.repo_url, state.sync_timeout)
        .await?;
    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());

    respond_sync(&state, outcome).await
}
