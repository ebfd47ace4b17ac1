//! Data model for crawl requests, tasks, and results
//!
//! This module defines the types that flow through the system: the incoming
//! crawl request, the per-file tasks handed to the worker pool, the per-file
//! results flowing back, and the aggregate crawl response returned to the
//! caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Incoming request to crawl a repository
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlRequest {
    /// Repository URL, e.g. `https://github.com/owner/repo`
    pub repo_url: String,

    /// Branch, tag, or commit SHA; defaults to "main"
    #[serde(rename = "ref", default)]
    pub ref_name: Option<String>,

    /// Optional path-prefix filters; a file must match at least one if any
    /// are supplied
    #[serde(default)]
    pub path_filter: Vec<String>,
}

/// Basic repository identity, echoed back on the response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub owner: String,
    pub name: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

/// A file or directory entry in the Git tree
#[derive(Debug, Clone, Deserialize)]
pub struct TreeEntry {
    pub path: String,

    /// "blob" for files, "tree" for directories
    #[serde(rename = "type")]
    pub entry_type: String,

    pub sha: String,

    /// Declared size in bytes; absent for tree entries
    #[serde(default)]
    pub size: Option<u64>,
}

/// The recursive tree listing returned by the upstream tree endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TreeListing {
    pub sha: String,
    pub tree: Vec<TreeEntry>,

    /// True when the upstream truncated the listing
    #[serde(default)]
    pub truncated: bool,
}

/// The upstream content-endpoint response body
#[derive(Debug, Clone, Deserialize)]
pub struct ContentResponse {
    pub content: String,

    /// "base64" or plain
    pub encoding: String,
}

/// A single file fetch handed to the worker pool
///
/// Structurally this mirrors a blob entry from the tree listing, with the
/// repository identity propagated so workers do not need request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub path: String,
    pub sha: String,
    pub size: u64,
    pub owner: String,
    pub repo: String,
    pub ref_name: String,
}

/// Why a file did not produce content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// Declared size exceeds the configured limit; rejected before fetching
    Oversize { declared: u64, limit: u64 },

    /// Content failed the binary heuristic
    BinarySkipped,

    /// Content is not valid UTF-8
    InvalidTextEncoding,

    /// Fetch failed after exhausting retries
    FetchError { message: String },

    /// The crawl itself failed (tree enumeration, or the pool was stopped
    /// with this task still queued)
    CrawlFailed { message: String },
}

impl FetchFailure {
    /// Stable identifier used in the response errors list and in metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Oversize { .. } => "oversize",
            Self::BinarySkipped => "binary-skipped",
            Self::InvalidTextEncoding => "invalid-text-encoding",
            Self::FetchError { .. } => "fetch-error",
            Self::CrawlFailed { .. } => "crawl-failed",
        }
    }
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oversize { declared, limit } => {
                write!(f, "file size {} exceeds limit {}", declared, limit)
            }
            Self::BinarySkipped => write!(f, "skipping binary file"),
            Self::InvalidTextEncoding => write!(f, "file content is not valid UTF-8"),
            Self::FetchError { message } => write!(f, "{}", message),
            Self::CrawlFailed { message } => write!(f, "{}", message),
        }
    }
}

/// The outcome of one accepted fetch task
///
/// Exactly one of these is published per accepted task. `content` is present
/// iff `failure` is absent.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub path: String,
    pub sha: String,

    /// Size after decoding on success, the declared size on failure
    pub size: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip)]
    pub failure: Option<FetchFailure>,

    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    /// Builds a successful result carrying decoded content
    pub fn success(task: &FetchTask, content: String) -> Self {
        Self {
            path: task.path.clone(),
            sha: task.sha.clone(),
            size: content.len() as u64,
            content: Some(content),
            failure: None,
            fetched_at: Utc::now(),
        }
    }

    /// Builds a failed result for the given task
    pub fn failed(task: &FetchTask, failure: FetchFailure) -> Self {
        Self {
            path: task.path.clone(),
            sha: task.sha.clone(),
            size: task.size,
            content: None,
            failure: Some(failure),
            fetched_at: Utc::now(),
        }
    }

    /// Returns true if this result carries content
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// An error entry on the crawl response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlError {
    pub file_path: String,
    pub error: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

/// Aggregate response for one crawl
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResponse {
    pub total_files: usize,
    pub processed_files: usize,
    pub skipped_files: usize,
    pub errors: Vec<CrawlError>,
    pub root_tree_sha: String,

    /// True when the upstream truncated the tree listing
    pub truncated: bool,

    pub duration: String,
    pub repo_info: RepositoryInfo,

    /// Successful fetch results only
    pub files: Vec<FetchResult>,
}

/// Health check response body
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Upstream quota counters read from `X-RateLimit-*` response headers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaSnapshot {
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp at which the quota window resets
    pub reset: Option<i64>,
}

impl QuotaSnapshot {
    /// Fraction of the quota window already consumed, in `[0, 1]`
    pub fn used_fraction(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        (self.limit - self.remaining.min(self.limit)) as f64 / self.limit as f64
    }
}
