//! Integration tests for the crawler
//!
//! These tests use wiremock to create a mock upstream host and exercise the
//! full crawl cycle end-to-end: tree enumeration, the worker pool, retries,
//! content filtering, backpressure, and cancellation.

use quarry::config::Config;
use quarry::crawl::Orchestrator;
use quarry::filter::ContentFilter;
use quarry::github::{GithubClient, StaticTokenProvider};
use quarry::limiter::AdaptiveRateLimiter;
use quarry::pool::FetchPool;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OWNER: &str = "octocat";
const REPO: &str = "hello-world";

/// Creates a test configuration pointed at the mock server
fn create_test_config(mock_uri: &str) -> Config {
    let mut config = Config::default();
    config.github.base_url = mock_uri.to_string();
    config.github.raw_base_url = format!("{}/raw", mock_uri);
    config.github.fetch_timeout_ms = 5_000;
    config.github.retry_max_attempts = 3;
    config.github.retry_backoff_base_ms = 10;
    // A generous pacer so tests are not throttled
    config.github.api_hourly_quota = 180_000; // 50 req/s
    config.rate_limit.max_rate = 50.0;
    config.pool.max_workers = 4;
    config.pool.max_concurrent_fetches = 8;
    config.filter.allowed_extensions = vec![]; // all extensions pass
    config.memory.enable_memory_monitor = false;
    config
}

struct TestStack {
    pool: FetchPool,
    orchestrator: Orchestrator,
    limiter: Arc<AdaptiveRateLimiter>,
}

/// Builds and starts the full stack against the given configuration
async fn build_stack(config: &Config) -> TestStack {
    let limiter = Arc::new(AdaptiveRateLimiter::new(
        &config.rate_limit,
        config.github.api_hourly_quota,
    ));
    let client = Arc::new(
        GithubClient::new(
            &config.github,
            "test-token".to_string(),
            Arc::new(StaticTokenProvider::new("test-token")),
            Arc::clone(&limiter),
        )
        .expect("failed to build client"),
    );
    let filter = Arc::new(ContentFilter::new(&config.filter));

    let pool = FetchPool::new(
        config,
        Arc::clone(&client),
        Arc::clone(&limiter),
        Arc::clone(&filter),
        Arc::new(AtomicBool::new(false)),
    );
    pool.start().await.expect("failed to start pool");

    let orchestrator = Orchestrator::new(pool.clone(), client, Arc::clone(&limiter), filter);

    TestStack {
        pool,
        orchestrator,
        limiter,
    }
}

/// JSON body for the tree endpoint
fn tree_body(entries: &[(&str, u64)]) -> serde_json::Value {
    let tree: Vec<serde_json::Value> = entries
        .iter()
        .enumerate()
        .map(|(i, (path, size))| {
            serde_json::json!({
                "path": path,
                "mode": "100644",
                "type": "blob",
                "sha": format!("blob-sha-{}", i),
                "size": size,
            })
        })
        .collect();

    serde_json::json!({
        "sha": "root-tree-sha",
        "url": "unused",
        "tree": tree,
        "truncated": false,
    })
}

/// Mounts the tree endpoint returning the given blob entries
async fn mount_tree(server: &MockServer, entries: &[(&str, u64)]) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/git/trees/main", OWNER, REPO)))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tree_body(entries)))
        .mount(server)
        .await;
}

/// Mounts a raw-content endpoint for one file
async fn mount_raw(server: &MockServer, file_path: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/raw/{}/{}/main/{}",
            OWNER, REPO, file_path
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_happy_path_tiny_repo() {
    let server = MockServer::start().await;

    mount_tree(
        &server,
        &[("README.md", 120), ("main.go", 800), ("logo.png", 4096)],
    )
    .await;

    mount_raw(&server, "README.md", b"# Hello World\n\nA tiny repo.\n".to_vec()).await;
    mount_raw(
        &server,
        "main.go",
        b"package main\n\nfunc main() {\n\tprintln(\"hi\")\n}\n".to_vec(),
    )
    .await;
    // PNG header with a null byte: fails the binary heuristic
    mount_raw(&server, "logo.png", vec![0x89, 0x50, 0x4E, 0x47, 0x00, 0x1A, 0x0A]).await;

    let config = create_test_config(&server.uri());
    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let response = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("crawl failed");

    assert_eq!(response.total_files, 3);
    assert_eq!(response.processed_files, 2);
    assert_eq!(response.skipped_files, 1);
    assert_eq!(response.root_tree_sha, "root-tree-sha");
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].file_path, "logo.png");
    assert_eq!(response.errors[0].error_type, "binary-skipped");

    let mut paths: Vec<&str> = response.files.iter().map(|f| f.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec!["README.md", "main.go"]);

    stack.pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversize_file_is_never_fetched() {
    let server = MockServer::start().await;

    let mut config = create_test_config(&server.uri());
    config.filter.max_file_size = 1000;

    mount_tree(&server, &[("big.bin", 1001)]).await;

    // No fetch may be issued for the oversize file
    Mock::given(method("GET"))
        .and(path(format!("/raw/{}/{}/main/big.bin", OWNER, REPO)))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let response = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("crawl failed");

    assert_eq!(response.total_files, 1);
    assert_eq!(response.processed_files, 0);
    assert_eq!(response.skipped_files, 1);
    assert_eq!(response.errors[0].file_path, "big.bin");
    assert_eq!(response.errors[0].error_type, "oversize");

    stack.pool.stop().await.unwrap();
    // Mock expectations (zero fetches) verify when the server drops
}

#[tokio::test]
async fn test_boundary_file_size_is_accepted() {
    let server = MockServer::start().await;

    let mut config = create_test_config(&server.uri());
    config.filter.max_file_size = 1000;

    mount_tree(&server, &[("exact.txt", 1000)]).await;
    mount_raw(&server, "exact.txt", vec![b'x'; 1000]).await;

    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let response = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("crawl failed");

    assert_eq!(response.processed_files, 1);
    assert_eq!(response.skipped_files, 0);

    stack.pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_transient_5xx_recovery() {
    let server = MockServer::start().await;

    mount_tree(&server, &[("hello.txt", 6)]).await;

    let raw_path = format!("/raw/{}/{}/main/hello.txt", OWNER, REPO);

    // Two 503s, then success: exactly three requests in total
    Mock::given(method("GET"))
        .and(path(raw_path.clone()))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(raw_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello\n".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri());
    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let response = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("crawl failed");

    assert_eq!(response.processed_files, 1);
    assert_eq!(response.files[0].content.as_deref(), Some("hello\n"));

    stack.pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_content_api_fallback_decodes_base64() {
    let server = MockServer::start().await;

    mount_tree(&server, &[("fallback.txt", 6)]).await;

    // The raw endpoint has nothing for this path
    Mock::given(method("GET"))
        .and(path(format!("/raw/{}/{}/main/fallback.txt", OWNER, REPO)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/repos/{}/{}/contents/fallback.txt",
            OWNER, REPO
        )))
        .and(query_param("ref", "main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": "aGVsbG8K",
            "encoding": "base64",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri());
    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let response = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("crawl failed");

    assert_eq!(response.processed_files, 1);
    assert_eq!(response.files[0].content.as_deref(), Some("hello\n"));

    stack.pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_utf8_is_skipped() {
    let server = MockServer::start().await;

    mount_tree(&server, &[("latin1.txt", 13)]).await;
    // A lone 0xC3 makes this invalid UTF-8 while staying under the binary
    // heuristic's non-printable ratio
    mount_raw(&server, "latin1.txt", b"hello \xC3 world".to_vec()).await;

    let config = create_test_config(&server.uri());
    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let response = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("crawl failed");

    assert_eq!(response.processed_files, 0);
    assert_eq!(response.skipped_files, 1);
    assert_eq!(response.errors[0].error_type, "invalid-text-encoding");

    stack.pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_quota_headers_slow_the_limiter() {
    let server = MockServer::start().await;

    // Only the tree response carries quota headers: 10% remaining means
    // used-fraction 0.9, which halves the rate exactly once
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/git/trees/main", OWNER, REPO)))
        .and(query_param("recursive", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(tree_body(&[("a.txt", 3)]))
                .insert_header("x-ratelimit-limit", "5000")
                .insert_header("x-ratelimit-remaining", "500"),
        )
        .mount(&server)
        .await;
    mount_raw(&server, "a.txt", b"ok\n".to_vec()).await;

    let mut config = create_test_config(&server.uri());
    config.github.api_hourly_quota = 18_000; // 5 req/s starting rate

    let stack = build_stack(&config).await;
    assert!((stack.limiter.current_rate() - 5.0).abs() < 1e-9);

    let cancel = CancellationToken::new();
    let response = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("crawl failed");

    assert_eq!(response.processed_files, 1);
    assert!((stack.limiter.current_rate() - 2.5).abs() < 1e-9);

    stack.pool.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backpressure_without_drop() {
    let server = MockServer::start().await;

    let files: Vec<(String, u64)> = (0..10).map(|i| (format!("file-{}.txt", i), 5)).collect();
    let entries: Vec<(&str, u64)> = files.iter().map(|(p, s)| (p.as_str(), *s)).collect();
    mount_tree(&server, &entries).await;

    // Slow responses keep the workers busy so the queue fills
    for (file_path, _) in &files {
        Mock::given(method("GET"))
            .and(path(format!("/raw/{}/{}/main/{}", OWNER, REPO, file_path)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data\n".to_vec())
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
    }

    let mut config = create_test_config(&server.uri());
    // Tight channel: pause triggers at depth 4
    config.pool.max_concurrent_fetches = 4;
    config.pool.backpressure_threshold = 0.8;
    config.pool.max_workers = 4;

    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let response = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("crawl failed");

    // Every submitted task yields a result; nothing is dropped and no
    // queue-full error surfaces
    assert_eq!(response.total_files, 10);
    assert_eq!(response.processed_files, 10);
    assert_eq!(response.skipped_files, 0);
    assert!(response.errors.is_empty());

    stack.pool.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_returns_partial_counts() {
    let server = MockServer::start().await;

    let files: Vec<(String, u64)> = (0..30).map(|i| (format!("slow-{}.txt", i), 5)).collect();
    let entries: Vec<(&str, u64)> = files.iter().map(|(p, s)| (p.as_str(), *s)).collect();
    mount_tree(&server, &entries).await;

    for (file_path, _) in &files {
        Mock::given(method("GET"))
            .and(path(format!("/raw/{}/{}/main/{}", OWNER, REPO, file_path)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data\n".to_vec())
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
    }

    let mut config = create_test_config(&server.uri());
    config.pool.max_workers = 4;
    config.pool.max_concurrent_fetches = 8;

    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        })
    };

    let start = Instant::now();
    let response = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("cancelled crawl should return partial counts");
    let elapsed = start.elapsed();
    canceller.await.unwrap();

    assert_eq!(response.total_files, 30);
    assert!(
        response.processed_files < 30,
        "expected a partial crawl, processed {}",
        response.processed_files
    );
    assert!(
        elapsed < Duration::from_secs(3),
        "cancellation took too long: {:?}",
        elapsed
    );

    // The pool survives a cancelled request and serves the next crawl
    let cancel2 = CancellationToken::new();
    let response2 = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel2)
        .await
        .expect("second crawl failed");
    assert_eq!(response2.total_files, 30);

    stack.pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_tree_failure_unwinds_the_crawl() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/git/trees/main", OWNER, REPO)))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri());
    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let result = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await;
    assert!(result.is_err());

    stack.pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_path_prefix_filter_limits_candidates() {
    let server = MockServer::start().await;

    mount_tree(
        &server,
        &[("src/lib.rs", 10), ("src/main.rs", 10), ("docs/guide.md", 10)],
    )
    .await;
    mount_raw(&server, "src/lib.rs", b"pub fn lib() {}\n".to_vec()).await;
    mount_raw(&server, "src/main.rs", b"fn main() {}\n".to_vec()).await;

    let config = create_test_config(&server.uri());
    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let response = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &["src/".to_string()], &cancel)
        .await
        .expect("crawl failed");

    assert_eq!(response.total_files, 2);
    assert_eq!(response.processed_files, 2);

    stack.pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_identical_crawls_are_idempotent() {
    let server = MockServer::start().await;

    mount_tree(&server, &[("a.txt", 2), ("b.txt", 2)]).await;
    mount_raw(&server, "a.txt", b"a\n".to_vec()).await;
    mount_raw(&server, "b.txt", b"b\n".to_vec()).await;

    let config = create_test_config(&server.uri());
    let stack = build_stack(&config).await;
    let cancel = CancellationToken::new();

    let first = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("first crawl failed");
    let second = stack
        .orchestrator
        .crawl(OWNER, REPO, "main", &[], &cancel)
        .await
        .expect("second crawl failed");

    assert_eq!(first.total_files, second.total_files);

    let paths = |r: &quarry::model::CrawlResponse| {
        let mut p: Vec<String> = r.files.iter().map(|f| f.path.clone()).collect();
        p.sort();
        p
    };
    assert_eq!(paths(&first), paths(&second));

    stack.pool.stop().await.unwrap();
}
