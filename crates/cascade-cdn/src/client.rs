//! HTTP client with retry, backoff, and range requests.

use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::{Error, Result};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Retry schedule for one host: exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first; 0 disables retrying.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Fraction of the backoff randomised in each direction.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff_ms as f64);
        let spread = capped * self.jitter;
        let jittered = capped + (rand::random::<f64>() * 2.0 - 1.0) * spread;
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// An inclusive byte range for a `Range` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Range covering `size` bytes from `offset`.
    pub fn at(offset: u64, size: u64) -> Self {
        Self {
            start: offset,
            end: offset + size.saturating_sub(1),
        }
    }

    fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// CDN client for one-shot and range-addressed GETs.
///
/// The underlying `reqwest` client pools connections, so one instance
/// should be shared across all fetches of a build.
#[derive(Debug, Clone)]
pub struct CdnClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl CdnClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .pool_max_idle_per_host(20)
            .build()?;
        Ok(Self {
            client,
            policy: RetryPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET a URL, retrying per policy. 429 and 5xx responses and
    /// transport errors retry; other 4xx fail fast.
    pub async fn get(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes> {
        let mut last: Option<String> = None;

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                let backoff = self.policy.backoff(attempt - 1);
                debug!("Retry {} for {} after {:?}", attempt, url, backoff);
                sleep(backoff).await;
            }

            let mut request = self.client.get(url);
            if let Some(range) = range {
                request = request.header(reqwest::header::RANGE, range.header_value());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    trace!("{} -> {}", url, status);

                    if status.is_success() {
                        return Ok(response.bytes().await?);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        // Honor Retry-After within the backoff cap.
                        let wait = response
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(1)
                            .min(self.policy.max_backoff_ms / 1000 + 1);
                        warn!("Rate limited on {}; waiting {}s", url, wait);
                        sleep(Duration::from_secs(wait)).await;
                        last = Some(format!("status {status}"));
                        continue;
                    }

                    if status.is_server_error() {
                        warn!("Server error {} from {} (attempt {})", status, url, attempt + 1);
                        last = Some(format!("status {status}"));
                        continue;
                    }

                    if status == StatusCode::NOT_FOUND {
                        let hash = url.rsplit('/').next().unwrap_or("unknown").to_string();
                        return Err(Error::NotFound { hash });
                    }
                    return Err(Error::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(e) => {
                    let retryable = e.is_connect() || e.is_timeout() || e.is_request();
                    if !retryable {
                        return Err(Error::Http(e));
                    }
                    warn!("Request to {} failed (attempt {}): {}", url, attempt + 1, e);
                    last = Some(e.to_string());
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts: self.policy.max_retries + 1,
            url: url.to_string(),
            last: last.unwrap_or_else(|| "no response".to_string()),
        })
    }
}

/// Content kind segment of a CDN path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Data,
    Config,
    Patch,
}

impl PathKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Config => "config",
            Self::Patch => "patch",
        }
    }
}

/// CDN URL for a hash: `{host}/{path}/{kind}/{aa}/{bb}/{hash}[.index]`.
///
/// `host` may carry an explicit scheme; bare hostnames get `http://`,
/// which is what the CDN manifests hand out.
pub fn build_url(
    host: &str,
    path: &str,
    kind: PathKind,
    hash: &str,
    index: bool,
) -> Result<String> {
    if hash.len() < 4 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidHash(hash.to_string()));
    }

    let base = if host.contains("://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_end_matches('/'))
    };
    let suffix = if index { ".index" } else { "" };
    Ok(format!(
        "{}/{}/{}/{}/{}/{}{}",
        base,
        path.trim_matches('/'),
        kind.as_str(),
        &hash[0..2],
        &hash[2..4],
        hash,
        suffix
    ))
}
