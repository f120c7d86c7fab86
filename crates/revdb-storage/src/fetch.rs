//! Retrying HTTP page fetcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// 5xx and 429 are transient. Any other non-success status is permanent.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
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
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-attempt timeout covering connect, headers and body.
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
            token_bucket: None,
        }
    }
}

/// Polite pacing shared by every worker: `capacity` requests, one token back every `refill_every`.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity.max(1),
                last_refill: Instant::now(),
            }),
        }
    }

    /// A zero refill interval disables pacing.
    pub async fn take(&self) {
        if self.refill_every.is_zero() {
            return;
        }
        loop {
            let mut state = self.state.lock().await;
            let refills = state.last_refill.elapsed().as_nanos() / self.refill_every.as_nanos();
            if refills > 0 {
                let refills = u32::try_from(refills).unwrap_or(u32::MAX);
                state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
                // Carry the partial interval forward.
                let advanced = self
                    .refill_every
                    .checked_mul(refills)
                    .and_then(|step| state.last_refill.checked_add(step));
                state.last_refill = advanced.unwrap_or_else(Instant::now);
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every.saturating_sub(state.last_refill.elapsed());
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub final_url: String,
    pub body: Vec<u8>,
    pub attempts: usize,
}

impl FetchedPage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {attempts} attempt(s): {url}")]
    Timeout { url: String, attempts: usize },
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url} after {attempts} attempt(s)")]
    HttpStatus {
        status: u16,
        url: String,
        attempts: usize,
    },
}

impl FetchError {
    pub fn attempts(&self) -> usize {
        match self {
            FetchError::Timeout { attempts, .. }
            | FetchError::Transport { attempts, .. }
            | FetchError::HttpStatus { attempts, .. } => *attempts,
        }
    }

    fn from_reqwest(url: &str, attempts: usize, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                attempts,
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                attempts,
                source: err,
            }
        }
    }
}

/// Anything that can turn a URL into page bytes. The pipeline only sees this seam.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, run_id: Uuid, url: &str) -> Result<FetchedPage, FetchError>;
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
    backoff: BackoffPolicy,
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
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(SimpleTokenBucket::new(c.capacity, c.refill_every)));

        Ok(Self {
            client,
            token_bucket,
            backoff: config.backoff,
        })
    }

    async fn attempt(&self, url: &str) -> Result<Result<FetchedPage, StatusCode>, reqwest::Error> {
        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Ok(Err(status));
        }

        let body = resp.bytes().await?.to_vec();
        Ok(Ok(FetchedPage {
            status: status.as_u16(),
            final_url,
            body,
            attempts: 0,
        }))
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let max_attempts = self.backoff.max_attempts();

        for attempt in 0..max_attempts {
            let attempts = attempt + 1;
            let last = attempts == max_attempts;

            match self.attempt(url).await {
                Ok(Ok(mut page)) => {
                    page.attempts = attempts;
                    debug!(attempts, bytes = page.body.len(), "fetched");
                    return Ok(page);
                }
                Ok(Err(status)) => {
                    if classify_status(status) == RetryDisposition::Retryable && !last {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(status = status.as_u16(), attempts, ?delay, "retrying after status");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                        attempts,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable && !last {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(error = %err, attempts, ?delay, "retrying after transport error");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(FetchError::from_reqwest(url, attempts, err));
                }
            }
        }

        // max_attempts is at least one, so the loop always returns.
        Err(FetchError::Timeout {
            url: url.to_string(),
            attempts: max_attempts,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, run_id: Uuid, url: &str) -> Result<FetchedPage, FetchError> {
        let span = info_span!("http_fetch", %run_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }
}
