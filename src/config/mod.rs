//! Configuration module for Quarry
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files. All options have defaults, so a missing file yields a runnable
//! configuration. The GitHub token is supplied separately via the
//! `GITHUB_TOKEN` environment variable.
//!
//! # Example
//!
//! ```no_run
//! use quarry::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("quarry.toml")).unwrap();
//! println!("Worker pool size: {}", config.pool.max_workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, FilterConfig, GithubConfig, MemoryConfig, PoolConfig, RateLimitConfig, ServerConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, github_token_from_env, load_config, load_config_with_hash};
