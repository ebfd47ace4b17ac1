//! Metric registration and recording helpers
//!
//! All series live under the `crawler_` prefix. Recording goes through the
//! `metrics` facade, so tests run with a no-op recorder and the binary
//! installs a Prometheus recorder whose rendering is served by the ingress.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Registers descriptions for every metric the crawler emits
///
/// Called once at startup after the recorder is installed.
pub fn describe() {
    describe_counter!(
        "crawler_http_requests_total",
        "Total number of HTTP requests received"
    );
    describe_histogram!(
        "crawler_http_request_duration_seconds",
        "Duration of HTTP requests in seconds"
    );
    describe_counter!(
        "crawler_files_requested_total",
        "Total number of files requested for crawling"
    );
    describe_counter!(
        "crawler_files_processed_total",
        "Total number of files processed, by outcome"
    );
    describe_counter!("crawler_errors_total", "Total number of errors encountered");
    describe_gauge!(
        "crawler_concurrency_in_use",
        "Number of concurrent operations currently in progress"
    );
    describe_counter!(
        "crawler_github_api_calls_total",
        "Total number of GitHub API calls made"
    );
    describe_gauge!(
        "crawler_github_rate_limit_used",
        "Number of GitHub API rate limit requests used"
    );
    describe_gauge!(
        "crawler_github_rate_limit_limit",
        "GitHub API rate limit maximum"
    );
    describe_gauge!(
        "crawler_adaptive_rate_limit",
        "Current adaptive request rate in requests per second"
    );
    describe_gauge!("crawler_worker_pool_size", "Current size of the worker pool");
    describe_gauge!("crawler_queue_depth", "Current depth of the task queue");
    describe_gauge!(
        "crawler_memory_resident_bytes",
        "Resident memory last sampled by the monitor"
    );
    describe_histogram!(
        "crawler_task_duration_seconds",
        "Duration of individual tasks in seconds"
    );
    describe_histogram!(
        "crawler_file_size_bytes",
        "Size of processed files in bytes"
    );
}

/// Records an ingress HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    counter!(
        "crawler_http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!(
        "crawler_http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
    )
    .record(duration_secs);
}

/// Records that a file was submitted for crawling
pub fn record_file_requested(owner: &str, repo: &str) {
    counter!(
        "crawler_files_requested_total",
        "repo_owner" => owner.to_string(),
        "repo_name" => repo.to_string(),
    )
    .increment(1);
}

/// Records a processed file with its outcome status
pub fn record_file_processed(owner: &str, repo: &str, status: &str) {
    counter!(
        "crawler_files_processed_total",
        "repo_owner" => owner.to_string(),
        "repo_name" => repo.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

/// Records an error by type
pub fn record_error(error_type: &str, owner: &str, repo: &str) {
    counter!(
        "crawler_errors_total",
        "type" => error_type.to_string(),
        "repo_owner" => owner.to_string(),
        "repo_name" => repo.to_string(),
    )
    .increment(1);
}

/// Records a GitHub API call by endpoint and response status
pub fn record_api_call(endpoint: &str, status: u16) {
    counter!(
        "crawler_github_api_calls_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

/// Updates the upstream quota gauges
pub fn update_rate_limit(used: u64, limit: u64) {
    gauge!("crawler_github_rate_limit_used").set(used as f64);
    gauge!("crawler_github_rate_limit_limit").set(limit as f64);
}

/// Sets the current adaptive request rate
pub fn set_adaptive_rate(rate: f64) {
    gauge!("crawler_adaptive_rate_limit").set(rate);
}

/// Sets the worker pool size gauge
pub fn set_worker_pool_size(size: usize) {
    gauge!("crawler_worker_pool_size").set(size as f64);
}

/// Sets the task queue depth gauge
pub fn set_queue_depth(depth: usize) {
    gauge!("crawler_queue_depth").set(depth as f64);
}

/// Sets the concurrency-in-use gauge
pub fn set_concurrency(count: usize) {
    gauge!("crawler_concurrency_in_use").set(count as f64);
}

/// Sets the sampled resident memory gauge
pub fn set_memory_resident_bytes(bytes: u64) {
    gauge!("crawler_memory_resident_bytes").set(bytes as f64);
}

/// Records the duration of an internal task
pub fn record_task_duration(task_type: &str, duration_secs: f64) {
    histogram!(
        "crawler_task_duration_seconds",
        "task_type" => task_type.to_string(),
    )
    .record(duration_secs);
}

/// Records the size of a successfully processed file
pub fn record_file_size(owner: &str, repo: &str, size_bytes: u64) {
    histogram!(
        "crawler_file_size_bytes",
        "repo_owner" => owner.to_string(),
        "repo_name" => repo.to_string(),
    )
    .record(size_bytes as f64);
}
