use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, Histogram, register_counter, register_gauge, register_histogram};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("gateway_requests_total", "Total number of requests").unwrap();
    pub static ref RATE_LIMITED_TOTAL: Counter = register_counter!(
        "gateway_rate_limited_total",
        "Requests denied by the rate limiter"
    )
    .unwrap();
    pub static ref DEDUP_HITS: Counter = register_counter!(
        "gateway_dedup_hits_total",
        "Submissions answered from a recent completed job"
    )
    .unwrap();
    pub static ref JOBS_SUBMITTED: Counter =
        register_counter!("gateway_jobs_submitted_total", "Jobs created").unwrap();
    pub static ref JOBS_COMPLETED: Counter =
        register_counter!("gateway_jobs_completed_total", "Jobs that reached COMPLETED").unwrap();
    pub static ref JOBS_FAILED: Counter =
        register_counter!("gateway_jobs_failed_total", "Jobs that reached FAILED").unwrap();
    pub static ref POOL_CALLER_RUNS: Counter = register_counter!(
        "gateway_pool_caller_runs_total",
        "Jobs run on the submitting task because pool and queue were full"
    )
    .unwrap();
    pub static ref QUEUE_DEPTH: Gauge = register_gauge!(
        "gateway_queue_depth",
        "Jobs currently waiting in the worker queue"
    )
    .unwrap();
    pub static ref WORKERS_LIVE: Gauge =
        register_gauge!("gateway_workers_live", "Live worker tasks").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "gateway_request_latency_seconds",
        "Request latency in seconds"
    )
    .unwrap();
}
