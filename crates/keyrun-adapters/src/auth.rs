//! Bearer credentials for the game-data API.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_TOKEN_URL: &str = "https://us.battle.net/oauth/token";

/// Tokens are refreshed this long before the upstream expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token endpoint unreachable after {attempts} attempts: {last_error}")]
    Unreachable { attempts: usize, last_error: String },
    #[error("token endpoint rejected the credentials with status {status}")]
    Rejected { status: u16 },
    #[error("token endpoint returned an undecodable body: {0}")]
    MalformedResponse(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn get_token(&self) -> Result<AccessToken, AuthError>;

    /// Drops any cached credential so the next call fetches a fresh one.
    async fn invalidate(&self) {}
}

#[derive(Debug, Clone)]
pub struct StaticTokenAuthenticator {
    token: AccessToken,
}

impl StaticTokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn get_token(&self) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthRetryPolicy {
    pub attempts: usize,
    pub spacing: Duration,
}

impl Default for AuthRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            spacing: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug)]
struct CachedToken {
    token: AccessToken,
    refresh_after: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.refresh_after.map_or(true, |at| Instant::now() < at)
    }
}

/// OAuth client-credentials grant with an in-process token cache.
pub struct ClientCredentialsAuthenticator {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    policy: AuthRetryPolicy,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for ClientCredentialsAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsAuthenticator")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ClientCredentialsAuthenticator {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            policy: AuthRetryPolicy::default(),
            cached: Mutex::new(None),
        }
    }

    pub fn with_policy(mut self, policy: AuthRetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn request_token(&self) -> Result<CachedToken, AuthError> {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let sent = self
                .client
                .post(&self.token_url)
                .basic_auth(&self.client_id, Some(&self.client_secret))
                .form(&[("grant_type", "client_credentials")])
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp
                        .bytes()
                        .await
                        .map_err(|e| AuthError::MalformedResponse(e.without_url().to_string()))?;
                    let parsed: TokenResponse = serde_json::from_slice(&body)
                        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
                    let refresh_after = parsed.expires_in.map(|secs| {
                        Instant::now() + Duration::from_secs(secs).saturating_sub(EXPIRY_MARGIN)
                    });
                    info!(expires_in = ?parsed.expires_in, "obtained access token");
                    return Ok(CachedToken {
                        token: AccessToken::new(parsed.access_token),
                        refresh_after,
                    });
                }
                Ok(resp) if resp.status().is_client_error() => {
                    return Err(AuthError::Rejected {
                        status: resp.status().as_u16(),
                    });
                }
                Ok(resp) => last_error = format!("http status {}", resp.status().as_u16()),
                Err(err) => last_error = err.without_url().to_string(),
            }

            warn!(attempt, attempts, error = %last_error, "token request failed");
            if attempt < attempts {
                tokio::time::sleep(self.policy.spacing).await;
            }
        }

        Err(AuthError::Unreachable {
            attempts,
            last_error,
        })
    }
}

#[async_trait]
impl Authenticator for ClientCredentialsAuthenticator {
    async fn get_token(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref().filter(|entry| entry.is_fresh()) {
            debug!("reusing cached access token");
            return Ok(entry.token.clone());
        }
        let fresh = self.request_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_debug_is_redacted() {
        let token = AccessToken::new("very-secret");
        assert_eq!(format!("{token:?}"), "AccessToken(<redacted>)");
        assert_eq!(token.as_str(), "very-secret");
    }

    #[test]
    fn cached_token_freshness() {
        let never = CachedToken {
            token: AccessToken::new("a"),
            refresh_after: None,
        };
        assert!(never.is_fresh());
        let stale = CachedToken {
            token: AccessToken::new("a"),
            refresh_after: Some(Instant::now()),
        };
        assert!(!stale.is_fresh());
    }

    #[tokio::test]
    async fn static_authenticator_returns_its_token() {
        let auth = StaticTokenAuthenticator::new("abc");
        assert_eq!(auth.get_token().await.unwrap().as_str(), "abc");
        auth.invalidate().await;
        assert_eq!(auth.get_token().await.unwrap().as_str(), "abc");
    }
}
