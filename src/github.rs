//! Upstream source API client: repository metadata, listings, README.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use std::sync::Arc;

use crate::credentials::{CredentialCache, USER_AGENT_VALUE};
use crate::error::ApiError;
use crate::models::{RepoContext, RepoSummary};

const MAX_REPOS_PER_PAGE: u32 = 100;
const MAX_README_CHARS: usize = 8_000;

// Build files worth showing to the analysis engine when present
const KEY_FILES: [&str; 10] = [
    "package.json",
    "build.gradle.kts",
    "build.gradle",
    "pom.xml",
    "Cargo.toml",
    "go.mod",
    "requirements.txt",
    "pyproject.toml",
    "Dockerfile",
    "docker-compose.yml",
];

// Extract owner and repo from a GitHub repository URL
pub fn parse_repo_url(url: &str) -> Result<(String, String), ApiError> {
    let trimmed = url.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("github.com/"))
        .ok_or_else(|| ApiError::InvalidRequest(format!("Not a GitHub repository URL: {url}")))?;

    let mut parts = rest.split('/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => Ok((
            owner.to_string(),
            repo.trim_end_matches(".git").to_string(),
        )),
        _ => Err(ApiError::InvalidRequest(format!(
            "Expected github.com/{{owner}}/{{repo}}: {url}"
        ))),
    }
}

#[async_trait]
pub trait SourceApi: Send + Sync {
    async fn list_user_repos(&self, username: &str) -> Result<Vec<RepoSummary>, ApiError>;
    async fn repo_context(&self, owner: &str, repo: &str) -> Result<RepoContext, ApiError>;
}

pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    credentials: Arc<CredentialCache>,
}

#[derive(Deserialize)]
struct RepoDetail {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Deserialize)]
struct ContentEntry {
    name: String,
}

impl GithubClient {
    pub fn new(http: reqwest::Client, api_url: &str, credentials: Arc<CredentialCache>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    async fn get(&self, path: &str, accept: &str) -> Result<reqwest::Response, ApiError> {
        let token = self.credentials.get_valid().await?;
        self.http
            .get(format!("{}{}", self.api_url, path))
            .header(AUTHORIZATION, format!("Bearer {}", token.value))
            .header(ACCEPT, accept)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamApi(format!("GitHub request failed: {e}")))
    }

    async fn get_json(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        self.get(path, "application/vnd.github+json").await
    }

    async fn languages(&self, owner: &str, repo: &str) -> Vec<String> {
        let Ok(response) = self.get_json(&format!("/repos/{owner}/{repo}/languages")).await
        else {
            return Vec::new();
        };
        if !response.status().is_success() {
            return Vec::new();
        }
        match response.json::<serde_json::Map<String, serde_json::Value>>().await {
            Ok(map) => map.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn readme(&self, owner: &str, repo: &str) -> Option<String> {
        // raw media type skips the base64 content envelope
        let response = self
            .get(&format!("/repos/{owner}/{repo}/readme"), "application/vnd.github.raw+json")
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let text = response.text().await.ok()?;
        Some(truncate(text, MAX_README_CHARS))
    }

    async fn key_files(&self, owner: &str, repo: &str) -> Vec<String> {
        let Ok(response) = self.get_json(&format!("/repos/{owner}/{repo}/contents/")).await
        else {
            return Vec::new();
        };
        if !response.status().is_success() {
            return Vec::new();
        }
        match response.json::<Vec<ContentEntry>>().await {
            Ok(entries) => entries
                .into_iter()
                .map(|entry| entry.name)
                .filter(|name| KEY_FILES.contains(&name.as_str()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl SourceApi for GithubClient {
    async fn list_user_repos(&self, username: &str) -> Result<Vec<RepoSummary>, ApiError> {
        let response = self
            .get_json(&format!(
                "/users/{username}/repos?per_page={MAX_REPOS_PER_PAGE}&sort=updated"
            ))
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(ApiError::UpstreamApi(format!(
                    "GitHub user not found: {username}"
                )));
            }
            status => {
                return Err(ApiError::UpstreamApi(format!(
                    "GitHub returned {status} listing repositories"
                )));
            }
        }

        let repos: Vec<RepoSummary> = response
            .json()
            .await
            .map_err(|e| ApiError::UpstreamApi(format!("Bad GitHub response: {e}")))?;

        // forks say little about the author's own work
        Ok(repos.into_iter().filter(|repo| !repo.fork).collect())
    }

    async fn repo_context(&self, owner: &str, repo: &str) -> Result<RepoContext, ApiError> {
        let response = self.get_json(&format!("/repos/{owner}/{repo}")).await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(ApiError::UpstreamApi(format!(
                    "Repository not found: {owner}/{repo}"
                )));
            }
            status => {
                return Err(ApiError::UpstreamApi(format!(
                    "GitHub returned {status} fetching {owner}/{repo}"
                )));
            }
        }

        let detail: RepoDetail = response
            .json()
            .await
            .map_err(|e| ApiError::UpstreamApi(format!("Bad GitHub response: {e}")))?;

        tracing::info!(owner = %owner, repo = %repo, "fetched repo context");

        // the extras are best-effort; a missing README must not sink the job
        let languages = self.languages(owner, repo).await;
        let readme = self.readme(owner, repo).await;
        let key_files = self.key_files(owner, repo).await;

        Ok(RepoContext {
            name: detail.name,
            description: detail.description,
            language: detail.language,
            languages,
            readme,
            key_files,
        })
    }
}

fn truncate(text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_url() {
        let (owner, repo) = parse_repo_url("https://github.com/rust-lang/cargo").unwrap();
        assert_eq!(owner, "rust-lang");
        assert_eq!(repo, "cargo");
    }

    #[test]
    fn parses_url_without_scheme() {
        let (owner, repo) = parse_repo_url("github.com/tokio-rs/axum").unwrap();
        assert_eq!(owner, "tokio-rs");
        assert_eq!(repo, "axum");
    }

    #[test]
    fn strips_git_suffix_and_trailing_slash() {
        let (_, repo) = parse_repo_url("https://github.com/a/b.git").unwrap();
        assert_eq!(repo, "b");
        let (_, repo) = parse_repo_url("https://github.com/a/b/").unwrap();
        assert_eq!(repo, "b");
    }

    #[test]
    fn ignores_extra_path_segments() {
        let (owner, repo) =
            parse_repo_url("https://github.com/rust-lang/cargo/tree/master/src").unwrap();
        assert_eq!(owner, "rust-lang");
        assert_eq!(repo, "cargo");
    }

    #[test]
    fn rejects_foreign_hosts() {
        assert!(parse_repo_url("https://gitlab.com/a/b").is_err());
    }

    #[test]
    fn rejects_urls_without_a_repo() {
        assert!(parse_repo_url("https://github.com/onlyowner").is_err());
        assert!(parse_repo_url("https://github.com/").is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld".to_string();
        let cut = truncate(text, 3);
        assert!(cut.len() <= 3);
        assert!(cut.starts_with('h'));
    }
}
