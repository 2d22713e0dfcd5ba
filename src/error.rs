use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

// Closed error taxonomy - every failure the service can surface maps to
// exactly one HTTP status at this boundary
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Rate limit exceeded. Try again later.")]
    AdmissionDenied {
        limit: u32,
        retry_after_secs: Option<u64>,
    },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Job not found with id: {0}")]
    JobNotFound(Uuid),

    #[error("Result not found with id: {0}")]
    ResultNotFound(Uuid),

    #[error("Upstream credential unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("Upstream API error: {0}")]
    UpstreamApi(String),

    #[error("Request timed out, job {job_id} is still running")]
    DeferredTimeout { job_id: Uuid },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::AdmissionDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::JobNotFound(_) | ApiError::ResultNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::CredentialUnavailable(_) | ApiError::UpstreamApi(_) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::DeferredTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::AdmissionDenied { .. } => "rate_limited",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::JobNotFound(_) => "job_not_found",
            ApiError::ResultNotFound(_) => "result_not_found",
            ApiError::CredentialUnavailable(_) => "credential_unavailable",
            ApiError::UpstreamApi(_) => "upstream_error",
            ApiError::DeferredTimeout { .. } => "timeout",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        // a timed-out caller can still fetch the job by id later
        if let ApiError::DeferredTimeout { job_id } = &self {
            body["jobId"] = json!(job_id);
        }

        let mut response = (self.status(), Json(body)).into_response();

        if let ApiError::AdmissionDenied {
            limit,
            retry_after_secs,
        } = &self
        {
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u16));
            if let Some(secs) = retry_after_secs {
                headers.insert(header::RETRY_AFTER, HeaderValue::from(*secs));
            }
        }

        response
    }
}
