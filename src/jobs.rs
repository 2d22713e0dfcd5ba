//! Jobs: the PENDING -> PROCESSING -> COMPLETED/FAILED state machine, the
//! stores behind it, and the orchestrator that drives it on the worker pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::analysis::AnalysisEngine;
use crate::bridge::{self, DeferredSender};
use crate::error::ApiError;
use crate::github::{self, SourceApi};
use crate::metrics::{DEDUP_HITS, JOBS_COMPLETED, JOBS_FAILED, JOBS_SUBMITTED};
use crate::worker::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    RepoAnalysis,
    PortfolioGeneration,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub input_key: String,
    pub status: JobStatus,
    pub result_ref: Option<Uuid>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    fn new(job_type: JobType, input_key: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            input_key,
            status: JobStatus::Pending,
            result_ref: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// Create a dedup key (hash of job type + input)
pub fn dedup_key(job_type: JobType, input_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{job_type:?}"));
    hasher.update(input_key);
    format!("{:x}", hasher.finalize())
}

// The durable record of job identity and status. CRUD semantics are the
// collaborator's problem; the orchestrator only needs these five calls.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<(), ApiError>;
    async fn get(&self, id: Uuid) -> Result<Option<Job>, ApiError>;
    async fn update(&self, job: &Job) -> Result<(), ApiError>;
    async fn list(&self) -> Result<Vec<Job>, ApiError>;
    // latest COMPLETED job for this work item, if any
    async fn find_completed(&self, job_type: JobType, input_key: &str)
    -> Result<Option<Job>, ApiError>;
}

pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, Job>,
    completed: DashMap<String, Uuid>, // dedup key -> last completed job
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            completed: DashMap::new(),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), ApiError> {
        self.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, ApiError> {
        Ok(self.jobs.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update(&self, job: &Job) -> Result<(), ApiError> {
        if job.status == JobStatus::Completed {
            self.completed
                .insert(dedup_key(job.job_type, &job.input_key), job.id);
        }
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Job>, ApiError> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn find_completed(
        &self,
        job_type: JobType,
        input_key: &str,
    ) -> Result<Option<Job>, ApiError> {
        let Some(id) = self
            .completed
            .get(&dedup_key(job_type, input_key))
            .map(|entry| *entry)
        else {
            return Ok(None);
        };
        self.get(id).await
    }
}

// What result_ref points at
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub id: Uuid,
    pub kind: JobType,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put(&self, result: StoredResult) -> Result<(), ApiError>;
    async fn get(&self, id: Uuid) -> Result<Option<StoredResult>, ApiError>;
}

pub struct InMemoryResultStore {
    results: DashMap<Uuid, StoredResult>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self {
            results: DashMap::new(),
        }
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn put(&self, result: StoredResult) -> Result<(), ApiError> {
        self.results.insert(result.id, result);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredResult>, ApiError> {
        Ok(self.results.get(&id).map(|entry| entry.value().clone()))
    }
}

// Outcome of a synchronous submit-and-wait
pub enum SyncOutcome {
    Completed(Job),
    Failed(Job),
    TimedOut(Uuid),
}

pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    results: Arc<dyn ResultStore>,
    pool: Arc<WorkerPool>,
    source: Arc<dyn SourceApi>,
    engine: Arc<dyn AnalysisEngine>,
    dedup_ttl: chrono::Duration,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        results: Arc<dyn ResultStore>,
        pool: Arc<WorkerPool>,
        source: Arc<dyn SourceApi>,
        engine: Arc<dyn AnalysisEngine>,
        dedup_ttl: Duration,
    ) -> Self {
        Self {
            store,
            results,
            pool,
            source,
            engine,
            dedup_ttl: chrono::Duration::from_std(dedup_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(600)),
        }
    }

    // Creates a PENDING job, enqueues it, returns without waiting
    pub async fn submit(self: &Arc<Self>, job_type: JobType, input_key: String) -> Result<Job, ApiError> {
        self.submit_inner(job_type, input_key, None).await
    }

    // Synchronous path: same submission, but the caller waits for the
    // terminal state until the deadline
    pub async fn submit_and_wait(
        self: &Arc<Self>,
        job_type: JobType,
        input_key: String,
        deadline: Duration,
    ) -> Result<SyncOutcome, ApiError> {
        let (notify, wait) = bridge::deferred(deadline);
        let job = self.submit_inner(job_type, input_key, Some(notify)).await?;

        if job.status == JobStatus::Completed {
            // dedup hit, nothing to wait for
            return Ok(SyncOutcome::Completed(job));
        }

        match wait.wait().await {
            Ok(terminal) => {
                if terminal.status == JobStatus::Completed {
                    Ok(SyncOutcome::Completed(terminal))
                } else {
                    Ok(SyncOutcome::Failed(terminal))
                }
            }
            Err(_) => Ok(SyncOutcome::TimedOut(job.id)),
        }
    }

    async fn submit_inner(
        self: &Arc<Self>,
        job_type: JobType,
        input_key: String,
        notify: Option<DeferredSender<Job>>,
    ) -> Result<Job, ApiError> {
        if let Some(existing) = self.recent_completed(job_type, &input_key).await {
            if let Some(notify) = notify {
                notify.send(existing.clone());
            }
            return Ok(existing);
        }

        let job = Job::new(job_type, input_key);
        self.store.insert(job.clone()).await?;
        JOBS_SUBMITTED.inc();
        tracing::info!(job_id = %job.id, job_type = ?job_type, input = %job.input_key, "job created");

        let this = Arc::clone(self);
        let job_id = job.id;
        self.pool
            .execute(Box::pin(async move {
                let terminal = this.run_one(job_id).await;
                if let Some(notify) = notify {
                    if let Some(terminal) = terminal {
                        // the waiter may be gone after a timeout; fine
                        notify.send(terminal);
                    }
                }
            }))
            .await;

        Ok(job)
    }

    // Reuse a fresh COMPLETED job when the lookup works. A failing lookup
    // logs and falls through - it must never block creation.
    async fn recent_completed(&self, job_type: JobType, input_key: &str) -> Option<Job> {
        match self.store.find_completed(job_type, input_key).await {
            Ok(Some(job)) if Utc::now() - job.updated_at <= self.dedup_ttl => {
                DEDUP_HITS.inc();
                tracing::info!(job_id = %job.id, input = %input_key, "reusing recent completed job");
                Some(job)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "dedup lookup failed, creating a new job");
                None
            }
        }
    }

    pub async fn status(&self, job_id: Uuid) -> Result<Job, ApiError> {
        self.store
            .get(job_id)
            .await?
            .ok_or(ApiError::JobNotFound(job_id))
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, ApiError> {
        self.store.list().await
    }

    pub async fn result(&self, id: Uuid) -> Result<StoredResult, ApiError> {
        self.results
            .get(id)
            .await?
            .ok_or(ApiError::ResultNotFound(id))
    }

    // Runs on a pool worker. This is the only writer for the job after
    // creation; every failure is captured into the FAILED record instead
    // of escaping past the pool.
    async fn run_one(&self, job_id: Uuid) -> Option<Job> {
        let mut job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::error!(job_id = %job_id, "job vanished before processing");
                return None;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "cannot load job");
                return None;
            }
        };

        job.status = JobStatus::Processing;
        job.updated_at = Utc::now();
        if let Err(e) = self.store.update(&job).await {
            tracing::error!(job_id = %job.id, error = %e, "cannot persist PROCESSING state");
            return None;
        }

        match self.execute(&job).await {
            Ok(result_ref) => {
                job.status = JobStatus::Completed;
                job.result_ref = Some(result_ref);
                JOBS_COMPLETED.inc();
                tracing::info!(job_id = %job.id, result_ref = %result_ref, "job completed");
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error_message = Some(e.to_string());
                JOBS_FAILED.inc();
                tracing::warn!(job_id = %job.id, error = %e, "job failed");
            }
        }

        job.updated_at = Utc::now();
        if let Err(e) = self.store.update(&job).await {
            tracing::error!(job_id = %job.id, error = %e, "cannot persist terminal state");
        }
        Some(job)
    }

    async fn execute(&self, job: &Job) -> Result<Uuid, ApiError> {
        let data = match job.job_type {
            JobType::RepoAnalysis => {
                let (owner, repo) = github::parse_repo_url(&job.input_key)?;
                let context = self.source.repo_context(&owner, &repo).await?;
                let analysis = self.engine.analyze_repo(&context).await?;
                serde_json::to_value(&analysis).map_err(|e| ApiError::Internal(e.to_string()))?
            }
            JobType::PortfolioGeneration => {
                let repos = self.source.list_user_repos(&job.input_key).await?;
                if repos.is_empty() {
                    return Err(ApiError::UpstreamApi(format!(
                        "No public repositories found for user: {}",
                        job.input_key
                    )));
                }
                let portfolio = self.engine.generate_portfolio(&job.input_key, &repos).await?;
                serde_json::to_value(&portfolio).map_err(|e| ApiError::Internal(e.to_string()))?
            }
        };

        let result = StoredResult {
            id: Uuid::new_v4(),
            kind: job.job_type,
            data,
            created_at: Utc::now(),
        };
        let result_ref = result.id;
        self.results.put(result).await?;
        Ok(result_ref)
    }
}
