//! Quarry main entry point
//!
//! This is the command-line entry for the Quarry crawler service.

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use quarry::config::{github_token_from_env, load_config_with_hash, Config};
use quarry::crawl::Orchestrator;
use quarry::filter::ContentFilter;
use quarry::github::{GithubClient, StaticTokenProvider};
use quarry::limiter::AdaptiveRateLimiter;
use quarry::memory::MemoryMonitor;
use quarry::pool::FetchPool;
use quarry::server::{self, AppState};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Quarry: a repository content crawler
///
/// Quarry crawls a remote source repository at a given revision and returns
/// the decoded text content of every file that passes the configured
/// filters, pacing itself against the upstream API quota and the process
/// memory ceiling.
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(version)]
#[command(about = "A repository content crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file; defaults apply when omitted
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the effective settings without serving
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    serve(config).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("quarry=info,warn"),
            1 => EnvFilter::new("quarry=debug,info"),
            2 => EnvFilter::new("quarry=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and prints effective settings
fn handle_dry_run(config: &Config) {
    println!("=== Quarry Dry Run ===\n");

    println!("Server:");
    println!("  Listen: {}:{}", config.server.host, config.server.port);
    println!(
        "  Request timeout: {}s",
        config.server.request_timeout_secs
    );

    println!("\nUpstream:");
    println!("  API base: {}", config.github.base_url);
    println!("  Raw base: {}", config.github.raw_base_url);
    println!("  Hourly quota: {}", config.github.api_hourly_quota);
    println!("  Fetch timeout: {}ms", config.github.fetch_timeout_ms);
    println!(
        "  Retries: {} (backoff base {}ms)",
        config.github.retry_max_attempts, config.github.retry_backoff_base_ms
    );

    println!("\nWorker pool:");
    println!("  Workers: {}", config.pool.max_workers);
    println!(
        "  Concurrent fetches: {}",
        config.pool.max_concurrent_fetches
    );
    println!(
        "  Backpressure threshold: {}",
        config.pool.backpressure_threshold
    );
    println!("  Task buffer hint: {}", config.pool.task_buffer_size);

    println!("\nFilters:");
    println!("  Max file size: {} bytes", config.filter.max_file_size);
    println!(
        "  Allowed extensions: {}",
        config.filter.allowed_extensions.len()
    );
    println!(
        "  Binary detection: {}",
        config.filter.enable_binary_detection
    );

    println!("\nMemory monitor:");
    println!("  Enabled: {}", config.memory.enable_memory_monitor);
    println!("  Limit fraction: {}", config.memory.memory_limit_fraction);

    println!("\nRate limiter:");
    println!("  Adaptive: {}", config.rate_limit.enable_adaptive);
    println!(
        "  Bounds: {} - {} req/s (speedup factor {})",
        config.rate_limit.min_rate, config.rate_limit.max_rate, config.rate_limit.adjust_factor
    );

    println!("\n✓ Configuration is valid");
}

/// Wires up the service and runs it until shutdown
async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let token = github_token_from_env()?;

    // Metrics recorder must exist before anything records
    let prometheus = PrometheusBuilder::new().install_recorder()?;
    quarry::metrics::describe();

    let limiter = Arc::new(AdaptiveRateLimiter::new(
        &config.rate_limit,
        config.github.api_hourly_quota,
    ));
    let client = Arc::new(GithubClient::new(
        &config.github,
        token.clone(),
        Arc::new(StaticTokenProvider::new(token)),
        Arc::clone(&limiter),
    )?);
    let filter = Arc::new(ContentFilter::new(&config.filter));
    let memory_pressure = Arc::new(AtomicBool::new(false));

    let pool = FetchPool::new(
        &config,
        Arc::clone(&client),
        Arc::clone(&limiter),
        Arc::clone(&filter),
        Arc::clone(&memory_pressure),
    );
    pool.start().await?;

    let monitor = MemoryMonitor::spawn(&config.memory, pool.clone(), memory_pressure);

    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        client,
        Arc::clone(&limiter),
        filter,
    ));

    let state = AppState {
        orchestrator,
        pool: pool.clone(),
        request_timeout: config.request_timeout(),
        prometheus,
    };

    server::run(
        &config.server.host,
        config.server.port,
        state,
        shutdown_signal(),
    )
    .await?;

    // Graceful shutdown: monitor first, then drain the pool
    if let Some(monitor) = monitor {
        monitor.stop().await;
    }
    pool.stop().await?;

    tracing::info!("crawler service stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
