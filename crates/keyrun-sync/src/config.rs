use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use keyrun_adapters::{
    Authenticator, ClientCredentialsAuthenticator, StaticTokenAuthenticator, DEFAULT_BASE_URL,
    DEFAULT_LOCALE, DEFAULT_TOKEN_URL,
};
use keyrun_storage::{BackoffPolicy, HttpClientConfig, RateLimitConfig};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub api_base_url: String,
    pub api_locale: String,
    pub token_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Pre-issued bearer token; skips the client-credentials grant.
    pub access_token: Option<String>,
    pub http_timeout_secs: u64,
    pub max_concurrency: usize,
    pub chunk_size: usize,
    pub http_retries: usize,
    pub rate_limit_per_sec: Option<u32>,
    pub period_override: Option<u32>,
    pub user_agent: String,
    pub registry_path: PathBuf,
    pub reports_dir: PathBuf,
    pub summary_dir: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            database_url: non_empty("DATABASE_URL"),
            api_base_url: non_empty("KEYRUN_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_locale: non_empty("KEYRUN_API_LOCALE")
                .unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            token_url: non_empty("KEYRUN_TOKEN_URL")
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            client_id: non_empty("BLIZZARD_CLIENT_ID"),
            client_secret: non_empty("BLIZZARD_CLIENT_SECRET"),
            access_token: non_empty("KEYRUN_ACCESS_TOKEN"),
            http_timeout_secs: parse(non_empty("KEYRUN_HTTP_TIMEOUT_SECS")).unwrap_or(5),
            max_concurrency: parse(non_empty("KEYRUN_MAX_CONCURRENCY")).unwrap_or(8),
            chunk_size: parse(non_empty("KEYRUN_CHUNK_SIZE")).unwrap_or(10),
            http_retries: parse(non_empty("KEYRUN_HTTP_RETRIES")).unwrap_or(1),
            rate_limit_per_sec: parse(non_empty("KEYRUN_RATE_LIMIT_PER_SEC")),
            period_override: parse(non_empty("KEYRUN_PERIOD")),
            user_agent: non_empty("KEYRUN_USER_AGENT")
                .unwrap_or_else(|| "keyrun-bot/0.1".to_string()),
            registry_path: non_empty("KEYRUN_REGISTRY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("keyrun.yaml")),
            reports_dir: non_empty("KEYRUN_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./reports")),
            summary_dir: non_empty("KEYRUN_SUMMARY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs.max(1)),
            user_agent: Some(self.user_agent.clone()),
            max_concurrency: self.max_concurrency.max(1),
            chunk_size: self.chunk_size.max(1),
            backoff: BackoffPolicy {
                max_retries: self.http_retries,
                ..BackoffPolicy::default()
            },
            rate_limit: self.rate_limit_per_sec.map(RateLimitConfig::per_second),
        }
    }

    pub fn authenticator(&self, client: reqwest::Client) -> Result<Arc<dyn Authenticator>> {
        if let Some(token) = &self.access_token {
            return Ok(Arc::new(StaticTokenAuthenticator::new(token.clone())));
        }
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Ok(Arc::new(ClientCredentialsAuthenticator::new(
                client,
                self.token_url.clone(),
                id.clone(),
                secret.clone(),
            ))),
            _ => bail!(
                "no API credentials: set KEYRUN_ACCESS_TOKEN or BLIZZARD_CLIENT_ID and BLIZZARD_CLIENT_SECRET"
            ),
        }
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}
