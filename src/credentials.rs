//! GitHub App installation token cache with single-flight refresh.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::ApiError;

pub const USER_AGENT_VALUE: &str = "portfolio-gateway";

// Short-lived upstream credential, replaced wholesale on refresh
#[derive(Debug, Clone)]
pub struct Credential {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    fn expires_within(&self, margin: chrono::Duration) -> bool {
        Utc::now() >= self.expires_at - margin
    }
}

#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self) -> Result<Credential, ApiError>;
}

// One credential slot for the whole process. The lock is held across the
// refresh call, so when many callers find the slot stale only the first
// one hits the issuer; the rest wake up, re-check, and take the fresh
// value from the slot.
pub struct CredentialCache {
    issuer: Arc<dyn CredentialIssuer>,
    slot: Mutex<Option<Credential>>,
    safety_margin: chrono::Duration,
}

impl CredentialCache {
    pub fn new(issuer: Arc<dyn CredentialIssuer>, safety_margin: Duration) -> Self {
        Self {
            issuer,
            slot: Mutex::new(None),
            safety_margin: chrono::Duration::from_std(safety_margin)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
        }
    }

    pub async fn get_valid(&self) -> Result<Credential, ApiError> {
        let mut slot = self.slot.lock().await;

        if let Some(credential) = slot.as_ref() {
            if !credential.expires_within(self.safety_margin) {
                return Ok(credential.clone());
            }
        }

        tracing::info!("refreshing upstream installation token");
        let fresh = self.issuer.issue().await?;
        tracing::info!(expires_at = %fresh.expires_at, "installation token refreshed");
        *slot = Some(fresh.clone());
        Ok(fresh)
    }
}

// GitHub App claims: iat is backdated for clock skew and exp stays under
// GitHub's 10 minute ceiling
#[derive(Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

// Issues installation tokens by authenticating as the GitHub App:
// RS256 app JWT -> POST /app/installations/{id}/access_tokens
pub struct GithubAppIssuer {
    http: reqwest::Client,
    api_url: String,
    app_id: u64,
    installation_id: u64,
    signing_key: EncodingKey,
}

impl GithubAppIssuer {
    pub fn from_pem_file(
        http: reqwest::Client,
        api_url: &str,
        app_id: u64,
        installation_id: u64,
        private_key_path: &str,
    ) -> Result<Self, ApiError> {
        let pem = std::fs::read(private_key_path).map_err(|e| {
            ApiError::CredentialUnavailable(format!(
                "cannot read private key {private_key_path}: {e}"
            ))
        })?;
        let signing_key = EncodingKey::from_rsa_pem(&pem)
            .map_err(|e| ApiError::CredentialUnavailable(format!("invalid RSA key: {e}")))?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            app_id,
            installation_id,
            signing_key,
        })
    }

    fn app_jwt(&self) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 540,
            iss: self.app_id.to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| ApiError::CredentialUnavailable(format!("cannot sign app JWT: {e}")))
    }
}

#[async_trait]
impl CredentialIssuer for GithubAppIssuer {
    async fn issue(&self) -> Result<Credential, ApiError> {
        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, self.installation_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await
            .map_err(|e| {
                ApiError::CredentialUnavailable(format!("token endpoint unreachable: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(ApiError::CredentialUnavailable(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: InstallationTokenResponse = response.json().await.map_err(|e| {
            ApiError::CredentialUnavailable(format!("bad token response: {e}"))
        })?;

        Ok(Credential {
            value: body.token,
            expires_at: body.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingIssuer {
        calls: AtomicUsize,
        fail_next: AtomicBool,
        lifetime: chrono::Duration,
    }

    impl CountingIssuer {
        fn new(lifetime: chrono::Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
                lifetime,
            }
        }
    }

    #[async_trait]
    impl CredentialIssuer for CountingIssuer {
        async fn issue(&self) -> Result<Credential, ApiError> {
            // simulate the upstream round trip so concurrent callers pile up
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ApiError::CredentialUnavailable("issuer down".into()));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential {
                value: format!("token-{n}"),
                expires_at: Utc::now() + self.lifetime,
            })
        }
    }

    #[tokio::test]
    async fn returns_cached_credential_without_reissuing() {
        let issuer = Arc::new(CountingIssuer::new(chrono::Duration::hours(1)));
        let cache = CredentialCache::new(issuer.clone(), Duration::from_secs(300));

        let first = cache.get_valid().await.unwrap();
        let second = cache.get_valid().await.unwrap();

        assert_eq!(first.value, second.value);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshes_inside_the_safety_margin() {
        // lifetime shorter than the margin -> always considered stale
        let issuer = Arc::new(CountingIssuer::new(chrono::Duration::seconds(60)));
        let cache = CredentialCache::new(issuer.clone(), Duration::from_secs(300));

        cache.get_valid().await.unwrap();
        cache.get_valid().await.unwrap();

        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn hundred_concurrent_callers_trigger_one_refresh() {
        let issuer = Arc::new(CountingIssuer::new(chrono::Duration::hours(1)));
        let cache = Arc::new(CredentialCache::new(issuer.clone(), Duration::from_secs(300)));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.get_valid().await }));
        }

        for handle in handles {
            let credential = handle.await.unwrap().unwrap();
            assert_eq!(credential.value, "token-1");
        }
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_surfaces_and_next_call_retries() {
        let issuer = Arc::new(CountingIssuer::new(chrono::Duration::hours(1)));
        issuer.fail_next.store(true, Ordering::SeqCst);
        let cache = CredentialCache::new(issuer.clone(), Duration::from_secs(300));

        let err = cache.get_valid().await.unwrap_err();
        assert!(matches!(err, ApiError::CredentialUnavailable(_)));

        // the failure is not cached
        let credential = cache.get_valid().await.unwrap();
        assert_eq!(credential.value, "token-1");
    }
}
