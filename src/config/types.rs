use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Quarry
///
/// Every section and field has a default, so an empty file (or no file at
/// all) yields a runnable configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default, rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,
}

/// HTTP ingress configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Overall deadline for a single crawl request (seconds)
    #[serde(default = "default_request_timeout_secs", rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,
}

/// Upstream API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubConfig {
    #[serde(default = "default_base_url", rename = "base-url")]
    pub base_url: String,

    /// Base URL for raw content retrieval, which is cheaper than the API
    /// content endpoint
    #[serde(default = "default_raw_base_url", rename = "raw-base-url")]
    pub raw_base_url: String,

    /// Hourly request quota granted by the upstream; seeds the initial
    /// adaptive rate as quota/3600
    #[serde(default = "default_api_hourly_quota", rename = "api-hourly-quota")]
    pub api_hourly_quota: u32,

    /// Per-attempt fetch deadline (milliseconds)
    #[serde(default = "default_fetch_timeout_ms", rename = "fetch-timeout-ms")]
    pub fetch_timeout_ms: u64,

    /// Retries beyond the first attempt
    #[serde(default = "default_retry_max_attempts", rename = "retry-max-attempts")]
    pub retry_max_attempts: u32,

    /// Initial retry sleep, doubled on each retry (milliseconds)
    #[serde(
        default = "default_retry_backoff_base_ms",
        rename = "retry-backoff-base-ms"
    )]
    pub retry_backoff_base_ms: u64,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of workers spawned on start
    #[serde(default = "default_max_workers", rename = "max-workers")]
    pub max_workers: usize,

    /// Capacity of the task and result channels
    #[serde(
        default = "default_max_concurrent_fetches",
        rename = "max-concurrent-fetches"
    )]
    pub max_concurrent_fetches: usize,

    /// Fraction of channel capacity at which submission pauses the pool
    #[serde(
        default = "default_backpressure_threshold",
        rename = "backpressure-threshold"
    )]
    pub backpressure_threshold: f64,

    /// Pre-allocation hint for the overflow buffer; the buffer grows past it
    /// rather than dropping tasks
    #[serde(default = "default_task_buffer_size", rename = "task-buffer-size")]
    pub task_buffer_size: usize,
}

/// Content filtering configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Oversize threshold in bytes
    #[serde(default = "default_max_file_size", rename = "max-file-size")]
    pub max_file_size: u64,

    /// Extension allow-list; empty means all extensions pass
    #[serde(
        default = "default_allowed_extensions",
        rename = "allowed-extensions"
    )]
    pub allowed_extensions: Vec<String>,

    #[serde(
        default = "default_enable_binary_detection",
        rename = "enable-binary-detection"
    )]
    pub enable_binary_detection: bool,
}

/// Memory monitor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(
        default = "default_enable_memory_monitor",
        rename = "enable-memory-monitor"
    )]
    pub enable_memory_monitor: bool,

    /// Heap ceiling as a fraction of total system memory
    #[serde(
        default = "default_memory_limit_fraction",
        rename = "memory-limit-fraction"
    )]
    pub memory_limit_fraction: f64,
}

/// Adaptive rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default = "default_enable_adaptive", rename = "enable-adaptive")]
    pub enable_adaptive: bool,

    /// Lower bound on the adaptive rate (requests per second)
    #[serde(default = "default_min_rate", rename = "min-rate")]
    pub min_rate: f64,

    /// Upper bound on the adaptive rate (requests per second)
    #[serde(default = "default_max_rate", rename = "max-rate")]
    pub max_rate: f64,

    /// Multiplicative speedup step applied when quota headroom is large
    #[serde(default = "default_adjust_factor", rename = "adjust-factor")]
    pub adjust_factor: f64,
}

impl Config {
    /// Per-attempt fetch deadline as a duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.github.fetch_timeout_ms)
    }

    /// Initial retry sleep as a duration
    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_millis(self.github.retry_backoff_base_ms)
    }

    /// Overall per-request crawl deadline as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            raw_base_url: default_raw_base_url(),
            api_hourly_quota: default_api_hourly_quota(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            backpressure_threshold: default_backpressure_threshold(),
            task_buffer_size: default_task_buffer_size(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
            enable_binary_detection: default_enable_binary_detection(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enable_memory_monitor: default_enable_memory_monitor(),
            memory_limit_fraction: default_memory_limit_fraction(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enable_adaptive: default_enable_adaptive(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
            adjust_factor: default_adjust_factor(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_raw_base_url() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_api_hourly_quota() -> u32 {
    5000
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_base_ms() -> u64 {
    1000
}

fn default_max_workers() -> usize {
    50
}

fn default_max_concurrent_fetches() -> usize {
    100
}

fn default_backpressure_threshold() -> f64 {
    0.8
}

fn default_task_buffer_size() -> usize {
    1000
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    [
        ".go", ".js", ".ts", ".jsx", ".tsx", ".py", ".java", ".cpp", ".c", ".h", ".hpp", ".cs",
        ".rb", ".php", ".rs", ".swift", ".kt", ".scala", ".sh", ".bash", ".zsh", ".fish", ".ps1",
        ".bat", ".cmd", ".yaml", ".yml", ".json", ".xml", ".toml", ".ini", ".cfg", ".conf", ".md",
        ".rst", ".txt", ".sql", ".r", ".m", ".pl", ".lua", ".vim", ".el", ".clj", ".hs", ".fs",
        ".ml", ".pas", ".ada", ".cob", ".f90", ".pro", ".asm", ".s", ".lisp", ".scm", ".tcl",
        ".awk", ".sed", ".dockerfile", ".makefile", ".cmake", ".gradle", ".maven", ".sbt",
        ".cabal", ".stack", ".cargo", ".gemfile", ".requirements", ".setup", ".pipfile",
        ".poetry", ".pom", ".build", ".project", ".solution",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_enable_binary_detection() -> bool {
    true
}

fn default_enable_memory_monitor() -> bool {
    true
}

fn default_memory_limit_fraction() -> f64 {
    0.8
}

fn default_enable_adaptive() -> bool {
    true
}

fn default_min_rate() -> f64 {
    1.0
}

fn default_max_rate() -> f64 {
    50.0
}

fn default_adjust_factor() -> f64 {
    0.1
}
