//! HTTP fetching with per-request timeouts, retry classification and a bounded worker pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info_span, warn, Instrument};

const ACCESS_TOKEN_PARAM: &str = "access_token=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Request budget shared by every worker of a fetcher.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

impl RateLimitConfig {
    pub fn per_second(requests: u32) -> Self {
        let requests = requests.max(1);
        Self {
            capacity: requests,
            refill_every: Duration::from_secs(1) / requests,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Upper bound for one request, connect through body.
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_concurrency: usize,
    /// URLs per worker unit in [`HttpFetcher::fetch_all`].
    pub chunk_size: usize,
    pub backoff: BackoffPolicy,
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            user_agent: None,
            max_concurrency: 8,
            chunk_size: 10,
            backoff: BackoffPolicy::default(),
            rate_limit: None,
        }
    }
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            refill_every: config.refill_every,
            state: Mutex::new(BucketState {
                tokens: config.capacity.max(1),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Credits whole elapsed intervals. A partial interval carries over to
    /// the next refill unless the bucket is full.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let refills = elapsed.as_nanos() / self.refill_every.as_nanos();
        if refills == 0 {
            return;
        }
        let refills = u32::try_from(refills).unwrap_or(u32::MAX);
        let topped_up = state.tokens.saturating_add(refills);
        if topped_up >= self.capacity {
            state.tokens = self.capacity;
            state.last_refill = now;
        } else {
            state.tokens = topped_up;
            state.last_refill += self.refill_every * refills;
        }
    }

    pub async fn acquire(&self) {
        if self.refill_every.is_zero() {
            return;
        }
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state, Instant::now());
                if state.tokens > 0 {
                    state.tokens -= 1;
                    return;
                }
                self.refill_every
                    .saturating_sub(state.last_refill.elapsed())
                    .max(Duration::from_millis(1))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// Request URL with the access token redacted.
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetch worker pool closed")]
    WorkerPool,
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
            FetchError::WorkerPool => None,
        }
    }
}

/// A URL that produced no response; logged and excluded from the batch.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub url: String,
    pub status: Option<u16>,
    pub error: String,
}

impl FetchFailure {
    fn new(url: &str, err: &FetchError) -> Self {
        Self {
            url: redact_access_token(url),
            status: err.status(),
            error: err.to_string(),
        }
    }
}

/// Outcome of a concurrent fan-out. Responses arrive in completion order.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub responses: Vec<FetchedResponse>,
    pub failures: Vec<FetchFailure>,
    pub aborted_workers: usize,
}

impl FetchBatch {
    pub fn is_total_failure(&self) -> bool {
        self.responses.is_empty() && (!self.failures.is_empty() || self.aborted_workers > 0)
    }
}

/// Replaces the value of any `access_token` query parameter so URLs are safe to log.
pub fn redact_access_token(url: &str) -> String {
    let Some(start) = url.find(ACCESS_TOKEN_PARAM) else {
        return url.to_string();
    };
    let value_start = start + ACCESS_TOKEN_PARAM.len();
    let value_end = url[value_start..]
        .find('&')
        .map(|i| value_start + i)
        .unwrap_or(url.len());
    format!("{}<redacted>{}", &url[..value_start], &url[value_end..])
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_concurrency: usize,
    chunk_size: usize,
    backoff: BackoffPolicy,
    rate_limit: Option<Arc<TokenBucket>>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            max_concurrency: config.max_concurrency.max(1),
            chunk_size: config.chunk_size.max(1),
            backoff: config.backoff,
            rate_limit: config.rate_limit.map(|c| Arc::new(TokenBucket::new(c))),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// GETs one URL. Transient failures are retried per the backoff policy; any
    /// non-2xx status that survives retries is an error.
    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let redacted = redact_access_token(url);
        let span = info_span!("http_fetch", url = %redacted);
        self.fetch_with_retries(url, redacted.clone())
            .instrument(span)
            .await
    }

    async fn fetch_with_retries(
        &self,
        url: &str,
        redacted: String,
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            if let Some(bucket) = &self.rate_limit {
                bucket.acquire().await;
            }

            let (disposition, error) = match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp
                            .bytes()
                            .await
                            .map_err(|e| FetchError::Request(e.without_url()))?
                            .to_vec();
                        return Ok(FetchedResponse {
                            url: redacted,
                            status: status.as_u16(),
                            body,
                        });
                    }
                    (
                        classify_status(status),
                        FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: redacted.clone(),
                        },
                    )
                }
                Err(err) => (
                    classify_reqwest_error(&err),
                    FetchError::Request(err.without_url()),
                ),
            };

            if disposition == RetryDisposition::Retryable && attempt < self.backoff.max_retries {
                debug!(attempt, error = %error, "retrying request");
                tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                attempt += 1;
                continue;
            }
            return Err(error);
        }
    }

    /// Fetches every URL with at most `max_concurrency` workers active at once.
    ///
    /// URLs are split into fixed-size chunks and each chunk is one unit of work.
    /// A failed request is logged and left out of `responses`; it never aborts
    /// its siblings. Returns once every worker has finished.
    pub async fn fetch_all(&self, urls: &[String], max_concurrency: usize) -> FetchBatch {
        let limit = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut workers = JoinSet::new();

        for chunk in urls.chunks(self.chunk_size) {
            let chunk = chunk.to_vec();
            let fetcher = self.clone();
            let limit = Arc::clone(&limit);
            workers.spawn(async move {
                let Ok(_permit) = limit.acquire_owned().await else {
                    return chunk
                        .iter()
                        .map(|url| Err(FetchFailure::new(url, &FetchError::WorkerPool)))
                        .collect::<Vec<_>>();
                };
                let mut results = Vec::with_capacity(chunk.len());
                for url in &chunk {
                    results.push(
                        fetcher
                            .fetch_bytes(url)
                            .await
                            .map_err(|err| FetchFailure::new(url, &err)),
                    );
                }
                results
            });
        }

        let mut batch = FetchBatch::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(results) => {
                    for result in results {
                        match result {
                            Ok(response) => batch.responses.push(response),
                            Err(failure) => {
                                warn!(
                                    url = %failure.url,
                                    error = %failure.error,
                                    "fetch failed; dropping from batch"
                                );
                                batch.failures.push(failure);
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "fetch worker aborted");
                    batch.aborted_workers += 1;
                }
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn access_token_is_redacted() {
        assert_eq!(
            redact_access_token("https://x/a?namespace=dynamic-us&access_token=abc123&locale=en_US"),
            "https://x/a?namespace=dynamic-us&access_token=<redacted>&locale=en_US"
        );
        assert_eq!(
            redact_access_token("https://x/a?access_token=abc123"),
            "https://x/a?access_token=<redacted>"
        );
        assert_eq!(redact_access_token("https://x/a?b=1"), "https://x/a?b=1");
    }

    #[test]
    fn per_second_rate_limit_spreads_refills() {
        let config = RateLimitConfig::per_second(100);
        assert_eq!(config.capacity, 100);
        assert_eq!(config.refill_every, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn token_bucket_waits_once_drained() {
        let bucket = TokenBucket::new(RateLimitConfig {
            capacity: 2,
            refill_every: Duration::from_millis(40),
        });
        let started = Instant::now();
        bucket.acquire().await;
        bucket.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(30));
        bucket.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn refill_keeps_the_partial_interval() {
        let bucket = TokenBucket::new(RateLimitConfig {
            capacity: 10,
            refill_every: Duration::from_millis(10),
        });
        let now = Instant::now();
        let mut state = BucketState {
            tokens: 0,
            last_refill: now - Duration::from_millis(25),
        };

        bucket.refill(&mut state, now);
        assert_eq!(state.tokens, 2);
        assert_eq!(state.last_refill, now - Duration::from_millis(5));

        bucket.refill(&mut state, now + Duration::from_millis(5));
        assert_eq!(state.tokens, 3);
        assert_eq!(state.last_refill, now + Duration::from_millis(5));

        bucket.refill(&mut state, now + Duration::from_secs(60));
        assert_eq!(state.tokens, 10);
        assert_eq!(state.last_refill, now + Duration::from_secs(60));
    }

    #[test]
    fn total_failure_requires_no_responses() {
        let mut batch = FetchBatch::default();
        assert!(!batch.is_total_failure());
        batch.failures.push(FetchFailure {
            url: "u".into(),
            status: Some(401),
            error: "unauthorized".into(),
        });
        assert!(batch.is_total_failure());
        batch.responses.push(FetchedResponse {
            url: "v".into(),
            status: 200,
            body: vec![],
        });
        assert!(!batch.is_total_failure());
    }
}
