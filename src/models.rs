use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::{Job, JobStatus, JobType};

#[derive(Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRepoRequest {
    pub repo_url: String,
}

#[derive(Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePortfolioRequest {
    pub github_username: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreatedResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub input_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            status: job.status,
            input_key: job.input_key,
            result_ref: job.result_ref,
            error_message: job.error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

// GitHub repository listing entry, trimmed to what the prompts need
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RepoSummary {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stargazers_count: u32,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub html_url: String,
}

// Everything the analysis engine gets to see about one repository
#[derive(Serialize, Clone, Debug)]
pub struct RepoContext {
    pub name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub languages: Vec<String>,
    pub readme: Option<String>,
    pub key_files: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RepoAnalysis {
    pub project_name: String,
    pub short_description: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub detected_features: Vec<String>,
    pub readme_markdown: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperPortfolio {
    pub developer_name: String,
    pub professional_summary: String,
    #[serde(default)]
    pub top_skills: Vec<String>,
    #[serde(default)]
    pub selected_projects: Vec<PortfolioProject>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioProject {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

// Analysis engine API request format
#[derive(Deserialize, Serialize, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
}

// Analysis engine API response format
#[derive(Deserialize, Serialize, Clone)]
pub struct GenerateResponse {
    pub model: String,
    pub response: String,
}
