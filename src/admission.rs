//! Request admission: rule matching, client identity, quota headers.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RateLimitRule;
use crate::error::ApiError;
use crate::metrics::RATE_LIMITED_TOTAL;
use crate::rate_limit::{AdmissionDecision, BucketRegistry};
use crate::state::AppState;

pub struct AdmissionController {
    registry: BucketRegistry,
    rules: Vec<RateLimitRule>,
    exempt_paths: Vec<String>,
}

impl AdmissionController {
    pub fn new(rules: Vec<RateLimitRule>, exempt_paths: Vec<String>, idle_ttl: Duration) -> Self {
        Self {
            registry: BucketRegistry::new(idle_ttl),
            rules,
            exempt_paths,
        }
    }

    // None means the request passed without touching any bucket: either the
    // path is exempt or no rule matches it.
    pub fn admit(&self, path: &str, client: &str) -> Option<AdmissionDecision> {
        if self.is_exempt(path) {
            return None;
        }
        let rule = self.find_rule(path)?;
        // per-rule, per-client quota: exhausting one endpoint's budget must
        // not lock the client out of unrelated endpoints
        let key = format!("{}:{}", client, rule.path_pattern);
        Some(self.registry.try_consume(&key, rule))
    }

    // First matching rule in declaration order wins
    fn find_rule(&self, path: &str) -> Option<&RateLimitRule> {
        self.rules
            .iter()
            .find(|rule| path_matches(&rule.path_pattern, path))
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths
            .iter()
            .any(|pattern| path_matches(pattern, path))
    }

    pub fn registry(&self) -> &BucketRegistry {
        &self.registry
    }
}

// Patterns are path prefixes: "/api/" covers every API route,
// "/api/v1/portfolio/generate" also covers its "/async" variant
fn path_matches(pattern: &str, path: &str) -> bool {
    path.starts_with(pattern)
}

// Documented precedence: first X-Forwarded-For entry, then X-Real-IP, then
// the transport peer address; first non-empty source wins
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let client = client_identity(request.headers(), Some(peer));

    match state.admission.admit(&path, &client) {
        None => next.run(request).await,
        Some(decision) if decision.allowed => {
            let mut response = next.run(request).await;
            apply_quota_headers(response.headers_mut(), &decision);
            response
        }
        Some(decision) => {
            RATE_LIMITED_TOTAL.inc();
            tracing::warn!(client = %client, path = %path, "rate limit exceeded");
            ApiError::AdmissionDenied {
                limit: decision.limit,
                retry_after_secs: decision.retry_after_secs,
            }
            .into_response()
        }
    }
}

// Limit/remaining ride along on allowed responses too, for client pacing
fn apply_quota_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitRule, default_rules, exempt_paths};

    fn controller() -> AdmissionController {
        AdmissionController::new(default_rules(), exempt_paths(), Duration::from_secs(3600))
    }

    #[test]
    fn exempt_path_never_touches_a_bucket() {
        let controller = controller();

        assert!(controller.admit("/health", "1.2.3.4").is_none());
        assert!(controller.admit("/metrics", "1.2.3.4").is_none());
        assert!(controller.registry().is_empty());
    }

    #[test]
    fn unmatched_path_passes_without_a_bucket() {
        let controller = controller();

        assert!(controller.admit("/favicon.ico", "1.2.3.4").is_none());
        assert!(controller.registry().is_empty());
    }

    #[test]
    fn first_matching_rule_wins_over_the_catch_all() {
        let controller = controller();

        let decision = controller.admit("/api/v1/repos/analyze", "1.2.3.4").unwrap();
        assert!(decision.allowed);
        // analyze rule capacity, not the default 60
        assert_eq!(decision.limit, 10);
    }

    #[test]
    fn async_variant_shares_the_generate_rule() {
        let controller = controller();

        let decision = controller
            .admit("/api/v1/portfolio/generate/async", "1.2.3.4")
            .unwrap();
        assert_eq!(decision.limit, 5);
    }

    #[test]
    fn unlisted_api_path_falls_through_to_default_rule() {
        let controller = controller();

        let decision = controller.admit("/api/v1/jobs", "1.2.3.4").unwrap();
        assert_eq!(decision.limit, 60);
    }

    #[test]
    fn quotas_are_isolated_per_rule_for_one_client() {
        let controller = controller();

        // exhaust the portfolio quota
        for _ in 0..5 {
            assert!(
                controller
                    .admit("/api/v1/portfolio/generate", "1.2.3.4")
                    .unwrap()
                    .allowed
            );
        }
        let denied = controller
            .admit("/api/v1/portfolio/generate", "1.2.3.4")
            .unwrap();
        assert!(!denied.allowed);

        // unrelated endpoint still admits the same client
        let analyze = controller.admit("/api/v1/repos/analyze", "1.2.3.4").unwrap();
        assert!(analyze.allowed);
    }

    #[test]
    fn quotas_are_isolated_per_client() {
        let rules = vec![RateLimitRule::new(
            "/api/",
            1,
            1,
            Duration::from_secs(3600),
        )];
        let controller = AdmissionController::new(rules, vec![], Duration::from_secs(3600));

        assert!(controller.admit("/api/x", "1.1.1.1").unwrap().allowed);
        assert!(!controller.admit("/api/x", "1.1.1.1").unwrap().allowed);
        assert!(controller.admit("/api/x", "2.2.2.2").unwrap().allowed);
    }

    #[test]
    fn denial_carries_retry_hint_and_limit() {
        let controller = controller();

        for _ in 0..5 {
            controller.admit("/api/v1/portfolio/generate", "9.9.9.9");
        }
        let denied = controller
            .admit("/api/v1/portfolio/generate", "9.9.9.9")
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 5);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after_secs, Some(12));
    }

    #[test]
    fn identity_prefers_forwarded_for_then_real_ip_then_peer() {
        let peer: SocketAddr = "10.0.0.9:4242".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "192.168.1.1, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "172.16.0.1".parse().unwrap());
        assert_eq!(client_identity(&headers, Some(peer)), "192.168.1.1");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "172.16.0.1".parse().unwrap());
        assert_eq!(client_identity(&headers, Some(peer)), "172.16.0.1");

        let headers = HeaderMap::new();
        assert_eq!(client_identity(&headers, Some(peer)), "10.0.0.9");
    }

    #[test]
    fn blank_forwarded_for_falls_back() {
        let peer: SocketAddr = "10.0.0.9:4242".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "  ".parse().unwrap());
        assert_eq!(client_identity(&headers, Some(peer)), "10.0.0.9");
    }
}
