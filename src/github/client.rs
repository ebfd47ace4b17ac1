//! GitHub API client
//!
//! This module handles all HTTP requests to the upstream repository host:
//! - Building HTTP clients with proper user agent strings
//! - Recursive tree listing for a revision
//! - Blob retrieval, trying the raw endpoint first and falling back to the
//!   content API (with base64 decoding)
//! - Retry logic for transient failures
//! - Quota-header inspection feeding the adaptive rate limiter
//! - Error classification

use crate::config::GithubConfig;
use crate::limiter::AdaptiveRateLimiter;
use crate::model::{ContentResponse, QuotaSnapshot, TreeListing};
use base64::Engine;
use reqwest::{Client, Response, StatusCode};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// User agent sent on every upstream request
const USER_AGENT: &str = "quarry-crawler/1.0";

/// How much of an upstream error body is kept in the error message
const BODY_SNIPPET_LEN: usize = 512;

/// Errors produced by the fetch client
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("forbidden: {url}")]
    Forbidden { url: String },

    #[error("rate limited by upstream: {url}")]
    RateLimited { url: String },

    #[error("upstream error {status} for {url}: {body}")]
    Upstream {
        url: String,
        status: u16,
        body: String,
    },

    #[error("request timeout for {url}")]
    Timeout { url: String },

    #[error("network error for {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("invalid base64 content for {path}")]
    InvalidBase64 { path: String },

    #[error("invalid response body for {url}: {message}")]
    InvalidBody { url: String, message: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(reqwest::Error),

    #[error("token refresh failed: {0}")]
    TokenRefresh(String),
}

/// Source of API tokens
///
/// The crawler only ever sees an opaque token string; how one is minted
/// (personal access token, installation-token exchange) is the provider's
/// business.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Produces a fresh token
    async fn refresh(&self) -> Result<String, FetchError>;
}

/// Token provider backed by a fixed personal access token
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn refresh(&self) -> Result<String, FetchError> {
        Ok(self.token.clone())
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries beyond the first attempt
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff)
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Calculates the delay for a given retry attempt
    ///
    /// Uses exponential backoff: delay = base_delay * 2^attempt
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.base_delay * multiplier
    }

    /// Checks if an HTTP status should be retried
    ///
    /// Only 429 and 5xx are retryable; other client errors are terminal.
    fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }
}

/// Builds an HTTP client with proper configuration
///
/// The timeout applies per attempt, not to a whole retry chain.
pub fn build_http_client(timeout: Duration) -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(FetchError::ClientBuild)
}

/// GitHub API client with retry and quota-header inspection
pub struct GithubClient {
    http: Client,
    base_url: String,
    raw_base_url: String,
    retry: RetryPolicy,
    token: RwLock<Arc<String>>,
    provider: Arc<dyn TokenProvider>,
    limiter: Arc<AdaptiveRateLimiter>,
}

impl GithubClient {
    /// Creates a client from configuration, an initial token, and the
    /// limiter that consumes quota observations
    pub fn new(
        config: &GithubConfig,
        token: String,
        provider: Arc<dyn TokenProvider>,
        limiter: Arc<AdaptiveRateLimiter>,
    ) -> Result<Self, FetchError> {
        let http = build_http_client(Duration::from_millis(config.fetch_timeout_ms))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            raw_base_url: config.raw_base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy {
                max_retries: config.retry_max_attempts,
                base_delay: Duration::from_millis(config.retry_backoff_base_ms),
            },
            token: RwLock::new(Arc::new(token)),
            provider,
            limiter,
        })
    }

    /// Swaps in a fresh token from the provider
    pub async fn refresh_token(&self) -> Result<(), FetchError> {
        let fresh = self.provider.refresh().await?;
        let mut guard = self.token.write().expect("token lock poisoned");
        *guard = Arc::new(fresh);
        Ok(())
    }

    fn current_token(&self) -> Arc<String> {
        self.token.read().expect("token lock poisoned").clone()
    }

    /// Fetches the recursive Git tree for a repository revision
    pub async fn fetch_tree(
        &self,
        owner: &str,
        repo: &str,
        ref_name: &str,
        cancel: &CancellationToken,
    ) -> Result<TreeListing, FetchError> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.base_url, owner, repo, ref_name
        );

        let response = self.get_with_retry(&url, "get_tree", cancel).await?;
        let listing: TreeListing = response.json().await.map_err(|e| FetchError::InvalidBody {
            url,
            message: e.to_string(),
        })?;

        if listing.truncated {
            tracing::warn!(
                owner,
                repo,
                ref_name,
                "upstream truncated the tree listing; crawl will be partial"
            );
        }

        Ok(listing)
    }

    /// Fetches the content of a single file
    ///
    /// Tries the raw endpoint first (cheaper, and unmetered on some hosts);
    /// any failure there falls back to the content API endpoint, decoding
    /// base64 bodies as declared.
    pub async fn fetch_blob(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        ref_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        let raw_url = format!(
            "{}/{}/{}/{}/{}",
            self.raw_base_url, owner, repo, ref_name, path
        );

        match self.get_with_retry(&raw_url, "get_raw_content", cancel).await {
            Ok(response) => {
                let bytes = response.bytes().await.map_err(|e| FetchError::Network {
                    url: raw_url,
                    source: e,
                })?;
                Ok(bytes.to_vec())
            }
            Err(FetchError::Cancelled) => Err(FetchError::Cancelled),
            Err(raw_err) => {
                tracing::debug!(path, error = %raw_err, "raw fetch failed, falling back to content API");
                self.fetch_blob_via_api(owner, repo, path, ref_name, cancel)
                    .await
            }
        }
    }

    /// Fetches file content via the content API endpoint
    async fn fetch_blob_via_api(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        ref_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.base_url, owner, repo, path, ref_name
        );

        let response = self.get_with_retry(&url, "get_content", cancel).await?;
        let content: ContentResponse =
            response.json().await.map_err(|e| FetchError::InvalidBody {
                url,
                message: e.to_string(),
            })?;

        if content.encoding == "base64" {
            decode_base64_content(&content.content).ok_or_else(|| FetchError::InvalidBase64 {
                path: path.to_string(),
            })
        } else {
            Ok(content.content.into_bytes())
        }
    }

    /// Performs a GET with retry on transient failures
    ///
    /// Retries apply to network errors, 429, and 5xx statuses; attempts are
    /// separated by exponential backoff. Every response has its quota headers
    /// inspected before status handling.
    async fn get_with_retry(
        &self,
        url: &str,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<Response, FetchError> {
        let mut last_err: Option<FetchError> = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.delay_for_attempt(attempt - 1);
                tracing::debug!(url, attempt, ?delay, "retrying upstream request");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                }
            }

            let token = self.current_token();
            let request = self
                .http
                .get(url)
                .header("Authorization", format!("token {}", token))
                .header("Accept", "application/vnd.github.v3+json");

            let response = tokio::select! {
                r = request.send() => r,
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            };

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(classify_request_error(url, e));
                    continue;
                }
            };

            let status = response.status();
            crate::metrics::record_api_call(endpoint, status.as_u16());
            self.inspect_quota_headers(&response);

            if status.is_success() {
                return Ok(response);
            }

            if RetryPolicy::is_retryable_status(status) {
                last_err = Some(self.status_error(url, response).await);
                continue;
            }

            // 4xx other than 429 is terminal
            return Err(self.status_error(url, response).await);
        }

        Err(last_err.unwrap_or_else(|| FetchError::Upstream {
            url: url.to_string(),
            status: 0,
            body: "max retries exceeded".to_string(),
        }))
    }

    /// Maps a non-success response to the corresponding error
    async fn status_error(&self, url: &str, response: Response) -> FetchError {
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => FetchError::NotFound {
                url: url.to_string(),
            },
            StatusCode::FORBIDDEN => FetchError::Forbidden {
                url: url.to_string(),
            },
            StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
                url: url.to_string(),
            },
            _ => {
                let body = response.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
                FetchError::Upstream {
                    url: url.to_string(),
                    status: status.as_u16(),
                    body: snippet,
                }
            }
        }
    }

    /// Reads the upstream quota counters from response headers and emits
    /// them to the rate limiter and metrics
    fn inspect_quota_headers(&self, response: &Response) {
        let Some(quota) = parse_quota_headers(response) else {
            return;
        };

        crate::metrics::update_rate_limit(quota.limit - quota.remaining.min(quota.limit), quota.limit);
        self.limiter.observe(quota.used_fraction(), Instant::now());
    }
}

/// Parses the `X-RateLimit-*` headers into a quota snapshot
fn parse_quota_headers(response: &Response) -> Option<QuotaSnapshot> {
    let header_u64 = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
    };

    let limit = header_u64("x-ratelimit-limit")?;
    let remaining = header_u64("x-ratelimit-remaining")?;
    let reset = response
        .headers()
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());

    Some(QuotaSnapshot {
        limit,
        remaining,
        reset,
    })
}

/// Classifies a reqwest error into a fetch error
fn classify_request_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            source: e,
        }
    }
}

/// Decodes base64 content as returned by the content API
///
/// The upstream wraps the payload at 60 columns, so whitespace is stripped
/// before decoding.
fn decode_base64_content(encoded: &str) -> Option<Vec<u8>> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD.decode(cleaned).ok()
}

/// Parses a repository URL into owner and repo name
///
/// Accepts `https://github.com/{owner}/{repo}`, with an optional `.git`
/// suffix or trailing slash.
pub fn parse_repository_url(repo_url: &str) -> Result<(String, String), crate::CrawlerError> {
    let parsed = url::Url::parse(repo_url)
        .map_err(|e| crate::CrawlerError::InvalidRepositoryUrl(e.to_string()))?;

    let path = parsed
        .path()
        .trim_matches('/')
        .trim_end_matches(".git")
        .trim_end_matches('/');

    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(crate::CrawlerError::InvalidRepositoryUrl(format!(
            "expected owner/repo, got '{}'",
            path
        )));
    }

    Ok((parts[0].to_string(), parts[1].to_string()))
}
