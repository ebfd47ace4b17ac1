//! HTTP ingress
//!
//! Exposes the crawl service over HTTP:
//! - `POST /invoke` runs a crawl and returns the structured response
//! - `GET /health` reports pool liveness (503 when workers are not running)
//! - `GET /metrics` renders the Prometheus registry
//! - `GET /` returns service identity

use crate::crawl::Orchestrator;
use crate::github::parse_repository_url;
use crate::model::{CrawlError, CrawlRequest, CrawlResponse, HealthResponse, RepositoryInfo};
use crate::pool::FetchPool;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Default revision crawled when the request does not name one
const DEFAULT_REF: &str = "main";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub pool: FetchPool,
    pub request_timeout: Duration,
    pub prometheus: PrometheusHandle,
}

/// Builds the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/invoke", post(invoke_handler))
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the listener and serves until the shutdown future resolves
pub async fn run(
    host: &str,
    port: u16,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(host, port, "crawler service listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "quarry",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let running = state.pool.is_running();
    let status_code = if running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if running { "healthy" } else { "unhealthy" }.to_string(),
            service: "quarry".to_string(),
            timestamp: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

async fn invoke_handler(
    State(state): State<AppState>,
    Json(request): Json<CrawlRequest>,
) -> Response {
    if request.repo_url.is_empty() {
        return (StatusCode::BAD_REQUEST, "repo_url is required").into_response();
    }

    let (owner, repo) = match parse_repository_url(&request.repo_url) {
        Ok(parsed) => parsed,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Invalid repository URL: {}", e),
            )
                .into_response();
        }
    };

    let ref_name = request
        .ref_name
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REF.to_string());

    // The per-request deadline is the ultimate cancellation source; the
    // guard also cancels if the client disconnects and this future is
    // dropped
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let deadline = {
        let cancel = cancel.clone();
        let timeout = state.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };

    let result = state
        .orchestrator
        .crawl(&owner, &repo, &ref_name, &request.path_filter, &cancel)
        .await;
    deadline.abort();

    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            tracing::error!(owner, repo, error = %e, "crawl failed");
            let body = crawl_failed_response(&owner, &repo, &ref_name, &e.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

/// Builds the structured error body for an aborted crawl
fn crawl_failed_response(owner: &str, repo: &str, ref_name: &str, message: &str) -> CrawlResponse {
    CrawlResponse {
        total_files: 0,
        processed_files: 0,
        skipped_files: 0,
        errors: vec![CrawlError {
            file_path: String::new(),
            error: message.to_string(),
            error_type: "crawl_failed".to_string(),
        }],
        root_tree_sha: String::new(),
        truncated: false,
        duration: String::new(),
        repo_info: RepositoryInfo {
            owner: owner.to_string(),
            name: repo.to_string(),
            ref_name: ref_name.to_string(),
        },
        files: vec![],
    }
}

/// Records request count and latency for every route
async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    crate::metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
