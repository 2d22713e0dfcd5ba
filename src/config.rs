use clap::Parser;
use std::time::Duration;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "portfolio-gateway")]
#[command(about = "Admission-controlled gateway for repo analysis and portfolio generation")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // GitHub REST API base URL
    #[arg(long, default_value = "https://api.github.com")]
    pub github_api_url: String,

    // Chat model server base URL
    #[arg(long, default_value = "http://localhost:11434")]
    pub analysis_url: String,

    // Model used for analysis prompts
    #[arg(long, default_value = "llama3.1")]
    pub analysis_model: String,

    // GitHub App id
    #[arg(long, default_value_t = 0)]
    pub github_app_id: u64,

    // GitHub App installation id
    #[arg(long, default_value_t = 0)]
    pub github_installation_id: u64,

    // Path to the GitHub App RSA private key (PEM)
    #[arg(long, default_value = "github-app.pem")]
    pub github_private_key: String,

    // Refresh the installation token this many seconds before it expires
    #[arg(long, default_value_t = 300)]
    pub token_refresh_margin: u64,

    // Worker pool core size
    #[arg(long, default_value_t = 2)]
    pub pool_core_size: usize,

    // Worker pool max size
    #[arg(long, default_value_t = 5)]
    pub pool_max_size: usize,

    // Worker pool queue capacity
    #[arg(long, default_value_t = 50)]
    pub pool_queue_capacity: usize,

    // Deadline for the synchronous analyze/generate endpoints in seconds
    #[arg(long, default_value_t = 120)]
    pub sync_timeout: u64,

    // Idle time before a rate-limit bucket is evicted, in seconds
    #[arg(long, default_value_t = 7200)]
    pub bucket_idle_ttl: u64,

    // Freshness window for reusing a completed job, in seconds
    #[arg(long, default_value_t = 600)]
    pub dedup_ttl: u64,
}

pub const ANALYZE_REQUESTS_PER_MINUTE: u32 = 10;
pub const PORTFOLIO_REQUESTS_PER_MINUTE: u32 = 5;
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

// Per-route rate limit rule. Rules are checked in declaration order and the
// first matching pattern wins; parameters are fixed for a bucket's lifetime.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub path_pattern: String,
    pub capacity: u32,
    pub refill_tokens: u32,
    pub refill_period: Duration,
}

impl RateLimitRule {
    pub fn new(
        path_pattern: &str,
        capacity: u32,
        refill_tokens: u32,
        refill_period: Duration,
    ) -> Self {
        Self {
            path_pattern: path_pattern.to_string(),
            capacity,
            refill_tokens,
            refill_period,
        }
    }

    // Tokens per second
    pub fn refill_rate(&self) -> f64 {
        let secs = self.refill_period.as_secs_f64();
        if secs > 0.0 {
            self.refill_tokens as f64 / secs
        } else {
            0.0
        }
    }
}

// Ordered: the specific endpoint rules must come before the catch-all
pub fn default_rules() -> Vec<RateLimitRule> {
    vec![
        RateLimitRule::new(
            "/api/v1/repos/analyze",
            ANALYZE_REQUESTS_PER_MINUTE,
            ANALYZE_REQUESTS_PER_MINUTE,
            Duration::from_secs(60),
        ),
        RateLimitRule::new(
            "/api/v1/portfolio/generate",
            PORTFOLIO_REQUESTS_PER_MINUTE,
            PORTFOLIO_REQUESTS_PER_MINUTE,
            Duration::from_secs(60),
        ),
        RateLimitRule::new(
            "/api/",
            DEFAULT_REQUESTS_PER_MINUTE,
            DEFAULT_REQUESTS_PER_MINUTE,
            Duration::from_secs(60),
        ),
    ]
}

pub fn exempt_paths() -> Vec<String> {
    vec!["/health".to_string(), "/metrics".to_string()]
}
