//! Analysis engine client: prompts in, structured JSON out.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{
    DeveloperPortfolio, GenerateRequest, GenerateResponse, RepoAnalysis, RepoContext, RepoSummary,
};

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze_repo(&self, context: &RepoContext) -> Result<RepoAnalysis, ApiError>;
    async fn generate_portfolio(
        &self,
        username: &str,
        repos: &[RepoSummary],
    ) -> Result<DeveloperPortfolio, ApiError>;
}

pub struct AnalysisClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl AnalysisClient {
    pub fn new(http: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    async fn generate(&self, prompt: String) -> Result<String, ApiError> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamApi(format!("Analysis engine unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::UpstreamApi(format!(
                "Analysis engine returned {}",
                response.status()
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ApiError::UpstreamApi(format!("Bad analysis engine response: {e}")))?;

        Ok(body.response)
    }
}

#[async_trait]
impl AnalysisEngine for AnalysisClient {
    async fn analyze_repo(&self, context: &RepoContext) -> Result<RepoAnalysis, ApiError> {
        let raw = self.generate(analyze_prompt(context)).await?;
        let analysis: RepoAnalysis = serde_json::from_str(extract_json(&raw)).map_err(|_| {
            ApiError::UpstreamApi(format!(
                "Analysis engine returned no valid analysis for {}",
                context.name
            ))
        })?;
        tracing::info!(
            repo = %context.name,
            tech_stack = ?analysis.tech_stack,
            "analysis completed"
        );
        Ok(analysis)
    }

    async fn generate_portfolio(
        &self,
        username: &str,
        repos: &[RepoSummary],
    ) -> Result<DeveloperPortfolio, ApiError> {
        let raw = self.generate(portfolio_prompt(username, repos)).await?;
        serde_json::from_str(extract_json(&raw)).map_err(|_| {
            ApiError::UpstreamApi(format!(
                "Analysis engine returned no valid portfolio for {username}"
            ))
        })
    }
}

// Models love wrapping JSON in markdown fences; cut the object out
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end >= start {
            return &trimmed[start..=end];
        }
    }
    trimmed
}

fn analyze_prompt(context: &RepoContext) -> String {
    let mut prompt = String::new();
    prompt.push_str("Analyze the following repository and produce a concise assessment.\n\n");
    prompt.push_str(&format!("Repository: {}\n", context.name));
    if let Some(description) = &context.description {
        prompt.push_str(&format!("Description: {description}\n"));
    }
    if let Some(language) = &context.language {
        prompt.push_str(&format!("Primary language: {language}\n"));
    }
    if !context.languages.is_empty() {
        prompt.push_str(&format!("Languages: {}\n", context.languages.join(", ")));
    }
    if !context.key_files.is_empty() {
        prompt.push_str(&format!("Build files: {}\n", context.key_files.join(", ")));
    }
    if let Some(readme) = &context.readme {
        prompt.push_str("\nREADME:\n");
        prompt.push_str(readme);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nRespond with a single JSON object and nothing else, using exactly these fields: \
         {\"projectName\": string, \"shortDescription\": string, \"techStack\": [string], \
         \"detectedFeatures\": [string], \"readmeMarkdown\": string}. \
         readmeMarkdown is a professional README for the project in Markdown.",
    );
    prompt
}

fn portfolio_prompt(username: &str, repos: &[RepoSummary]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Create a developer portfolio for the GitHub user {username} from their public repositories.\n\n"
    ));
    for repo in repos {
        prompt.push_str(&format!(
            "- {} | language: {} | stars: {} | {}\n",
            repo.name,
            repo.language.as_deref().unwrap_or("unknown"),
            repo.stargazers_count,
            repo.description.as_deref().unwrap_or("no description"),
        ));
    }
    prompt.push_str(
        "\nPick the strongest projects. Respond with a single JSON object and nothing else, \
         using exactly these fields: {\"developerName\": string, \"professionalSummary\": string, \
         \"topSkills\": [string], \"selectedProjects\": [{\"name\": string, \"description\": \
         string, \"highlights\": [string]}]}.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_markdown_fence() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw), "{\"a\": 1}");
    }

    #[test]
    fn extracts_json_with_leading_prose() {
        let raw = "Here is the analysis you asked for:\n{\"a\": 1}";
        assert_eq!(extract_json(raw), "{\"a\": 1}");
    }

    #[test]
    fn plain_json_passes_through() {
        assert_eq!(extract_json("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn analyze_prompt_demands_strict_json() {
        let context = RepoContext {
            name: "demo".into(),
            description: Some("a demo".into()),
            language: Some("Rust".into()),
            languages: vec!["Rust".into()],
            readme: None,
            key_files: vec!["Cargo.toml".into()],
        };
        let prompt = analyze_prompt(&context);
        assert!(prompt.contains("demo"));
        assert!(prompt.contains("readmeMarkdown"));
        assert!(prompt.contains("single JSON object"));
    }
}
