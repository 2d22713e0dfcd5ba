mod admission;
mod analysis;
mod bridge;
mod config;
mod credentials;
mod error;
mod github;
mod handlers;
mod jobs;
mod metrics;
mod models;
mod rate_limit;
mod state;
mod worker;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing_subscriber::EnvFilter;

use crate::admission::{AdmissionController, admission_middleware};
use crate::analysis::AnalysisClient;
use crate::config::Args;
use crate::credentials::{CredentialCache, GithubAppIssuer};
use crate::github::GithubClient;
use crate::jobs::{InMemoryJobStore, InMemoryResultStore, JobOrchestrator};
use crate::state::AppState;
use crate::worker::WorkerPool;

const BUCKET_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let http = reqwest::Client::new();

    let issuer = match GithubAppIssuer::from_pem_file(
        http.clone(),
        &args.github_api_url,
        args.github_app_id,
        args.github_installation_id,
        &args.github_private_key,
    ) {
        Ok(issuer) => issuer,
        Err(e) => {
            tracing::error!(error = %e, "cannot load GitHub App credentials");
            std::process::exit(1);
        }
    };
    let credentials = Arc::new(CredentialCache::new(
        Arc::new(issuer),
        Duration::from_secs(args.token_refresh_margin),
    ));

    let github = Arc::new(GithubClient::new(
        http.clone(),
        &args.github_api_url,
        Arc::clone(&credentials),
    ));
    let analysis = Arc::new(AnalysisClient::new(
        http,
        &args.analysis_url,
        &args.analysis_model,
    ));

    let pool = WorkerPool::new(
        args.pool_core_size,
        args.pool_max_size,
        args.pool_queue_capacity,
    );
    let orchestrator = Arc::new(JobOrchestrator::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(InMemoryResultStore::new()),
        pool,
        github,
        analysis,
        Duration::from_secs(args.dedup_ttl),
    ));

    let admission = AdmissionController::new(
        config::default_rules(),
        config::exempt_paths(),
        Duration::from_secs(args.bucket_idle_ttl),
    );

    let state = Arc::new(AppState {
        admission,
        orchestrator,
        sync_timeout: Duration::from_secs(args.sync_timeout),
    });

    // sweep idle rate-limit buckets in the background
    let sweeper_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut tick = interval(BUCKET_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let evicted = sweeper_state.admission.registry().evict_idle();
            if evicted > 0 {
                tracing::debug!(evicted, "evicted idle rate-limit buckets");
            }
        }
    });

    let app = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/v1/repos/analyze", post(handlers::analyze_handler))
        .route("/api/v1/portfolio/generate", post(handlers::generate_handler))
        .route(
            "/api/v1/portfolio/generate/async",
            post(handlers::generate_async_handler),
        )
        .route("/api/v1/jobs", get(handlers::list_jobs_handler))
        .route("/api/v1/jobs/{id}", get(handlers::job_status_handler))
        .route("/api/v1/results/{id}", get(handlers::get_result_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            admission_middleware,
        ))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();

    tracing::info!(port = args.port, "gateway listening");
    tracing::info!(
        github = %args.github_api_url,
        analysis = %args.analysis_url,
        model = %args.analysis_model,
        "upstreams configured"
    );
    tracing::info!(
        core = args.pool_core_size,
        max = args.pool_max_size,
        queue = args.pool_queue_capacity,
        "worker pool ready"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
