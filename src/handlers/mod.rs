mod analyze;
mod health;
mod jobs;
mod metrics;
mod portfolio;

pub use analyze::analyze_handler;
pub use health::health_handler;
pub use jobs::{get_result_handler, job_status_handler, list_jobs_handler};
pub use metrics::metrics_handler;
pub use portfolio::{generate_async_handler, generate_handler};

use axum::Json;

use crate::error::ApiError;
use crate::jobs::{StoredResult, SyncOutcome};
use crate::state::AppState;

// Shared tail of the synchronous endpoints: completed -> 200 with the
// payload, failed -> 502, deadline expired -> 504 with the pollable id
pub(crate) async fn respond_sync(
    state: &AppState,
    outcome: SyncOutcome,
) -> Result<Json<StoredResult>, ApiError> {
    match outcome {
        SyncOutcome::Completed(job) => {
            let result_ref = job.result_ref.ok_or_else(|| {
                ApiError::Internal("completed job has no result reference".into())
            })?;
            Ok(Json(state.orchestrator.result(result_ref).await?))
        }
        SyncOutcome::Failed(job) => Err(ApiError::UpstreamApi(
            job.error_message.unwrap_or_else(|| "job failed".into()),
        )),
        SyncOutcome::TimedOut(job_id) => Err(ApiError::DeferredTimeout { job_id }),
    }
}
