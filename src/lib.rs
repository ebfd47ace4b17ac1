//! Quarry: a repository content crawler
//!
//! This crate implements a service that enumerates every file in a remote
//! GitHub repository at a given revision and returns the decoded text content
//! of the files that pass the configured filters, while respecting API rate
//! limits and process memory limits.

pub mod config;
pub mod crawl;
pub mod filter;
pub mod github;
pub mod limiter;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod server;

use thiserror::Error;

/// Main error type for Quarry operations
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to get repository tree for {owner}/{repo}: {source}")]
    TreeEnumeration {
        owner: String,
        repo: String,
        source: github::FetchError,
    },

    #[error("Fetch error: {0}")]
    Fetch(#[from] github::FetchError),

    #[error("Crawl cancelled")]
    Cancelled,

    #[error("Worker pool is not running")]
    PoolNotRunning,

    #[error("Worker pool is already running")]
    PoolAlreadyRunning,

    #[error("Invalid repository URL: {0}")]
    InvalidRepositoryUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing GitHub token: set the GITHUB_TOKEN environment variable")]
    MissingToken,
}

/// Result type alias for Quarry operations
pub type Result<T> = std::result::Result<T, CrawlerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{CrawlRequest, CrawlResponse, FetchFailure, FetchResult, FetchTask};
