use crate::config::types::{Config, FilterConfig, GithubConfig, MemoryConfig, PoolConfig, RateLimitConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_github_config(&config.github)?;
    validate_pool_config(&config.pool)?;
    validate_filter_config(&config.filter)?;
    validate_memory_config(&config.memory)?;
    validate_rate_limit_config(&config.rate_limit)?;
    Ok(())
}

/// Validates upstream API configuration
fn validate_github_config(config: &GithubConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("base-url", &config.base_url),
        ("raw-base-url", &config.raw_base_url),
    ] {
        let url = Url::parse(value)
            .map_err(|e| ConfigError::Validation(format!("invalid {}: {}", name, e)))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::Validation(format!(
                "{} must be an http(s) URL, got '{}'",
                name, value
            )));
        }
    }

    if config.fetch_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "fetch-timeout-ms must be greater than 0".to_string(),
        ));
    }

    if config.retry_backoff_base_ms == 0 {
        return Err(ConfigError::Validation(
            "retry-backoff-base-ms must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker pool configuration
fn validate_pool_config(config: &PoolConfig) -> Result<(), ConfigError> {
    if config.max_workers < 1 || config.max_workers > 1000 {
        return Err(ConfigError::Validation(format!(
            "max-workers must be between 1 and 1000, got {}",
            config.max_workers
        )));
    }

    if config.max_concurrent_fetches < 1 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-fetches must be >= 1, got {}",
            config.max_concurrent_fetches
        )));
    }

    if !(0.0 < config.backpressure_threshold && config.backpressure_threshold <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "backpressure-threshold must be in (0, 1], got {}",
            config.backpressure_threshold
        )));
    }

    Ok(())
}

/// Validates content filter configuration
fn validate_filter_config(config: &FilterConfig) -> Result<(), ConfigError> {
    if config.max_file_size == 0 {
        return Err(ConfigError::Validation(
            "max-file-size must be greater than 0".to_string(),
        ));
    }

    for ext in &config.allowed_extensions {
        if ext.is_empty() {
            return Err(ConfigError::Validation(
                "allowed-extensions entries cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates memory monitor configuration
fn validate_memory_config(config: &MemoryConfig) -> Result<(), ConfigError> {
    if !(0.0 < config.memory_limit_fraction && config.memory_limit_fraction <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "memory-limit-fraction must be in (0, 1], got {}",
            config.memory_limit_fraction
        )));
    }

    Ok(())
}

/// Validates rate limiter configuration
fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.min_rate <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "min-rate must be positive, got {}",
            config.min_rate
        )));
    }

    if config.max_rate < config.min_rate {
        return Err(ConfigError::Validation(format!(
            "max-rate ({}) must be >= min-rate ({})",
            config.max_rate, config.min_rate
        )));
    }

    if config.adjust_factor <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "adjust-factor must be positive, got {}",
            config.adjust_factor
        )));
    }

    Ok(())
}
