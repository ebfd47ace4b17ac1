//! Worker loop: dequeue, fetch, filter, publish
//!
//! Each worker is a cooperative task that pulls from the shared task channel,
//! honors pause/resume and pool cancellation at every suspension point, and
//! publishes exactly one result per task it dequeues.

use super::FetchPool;
use crate::model::{FetchFailure, FetchResult, FetchTask};
use std::time::Instant;

pub(super) async fn run(pool: FetchPool, worker_id: usize) {
    tracing::debug!(worker_id, "worker started");

    let mut pause_rx = pool.inner.pause_tx.subscribe();

    loop {
        let task = tokio::select! {
            _ = pool.inner.cancel.cancelled() => break,
            task = async {
                let mut rx = pool.inner.task_rx.lock().await;
                rx.recv().await
            } => match task {
                Some(task) => task,
                // Task channel closed: the pool is stopping
                None => break,
            }
        };

        let depth = pool.queue_depth();
        crate::metrics::set_queue_depth(depth);
        crate::metrics::set_concurrency(depth);

        // The pause gate sits between dequeue and fetch: a paused worker may
        // drain the channel by one task but never starts a fetch until the
        // resume signal arrives
        if !wait_while_paused(&pool, &mut pause_rx).await {
            publish_synthetic(&pool, &task);
            break;
        }

        let result = process_task(&pool, worker_id, &task).await;

        let send = async {
            match pool.result_sender() {
                Some(tx) => tx.send(result).await.is_ok(),
                None => false,
            }
        };
        tokio::select! {
            sent = send => {
                if !sent {
                    break;
                }
            }
            _ = pool.inner.cancel.cancelled() => {
                tracing::debug!(worker_id, "cancelled while sending result");
                break;
            }
        }
    }

    pool.inner
        .active_workers
        .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
    tracing::debug!(worker_id, "worker exited");
}

/// Blocks while the pool is paused; returns false on pool cancellation
async fn wait_while_paused(
    pool: &FetchPool,
    pause_rx: &mut tokio::sync::watch::Receiver<bool>,
) -> bool {
    if !*pause_rx.borrow() {
        return true;
    }

    tokio::select! {
        _ = pool.inner.cancel.cancelled() => false,
        r = pause_rx.wait_for(|paused| !*paused) => r.is_ok(),
    }
}

/// Publishes a synthetic failure for a task the worker dequeued but can no
/// longer process, so the task is not orphaned
fn publish_synthetic(pool: &FetchPool, task: &FetchTask) {
    if let Some(tx) = pool.result_sender() {
        let result = FetchResult::failed(
            task,
            FetchFailure::CrawlFailed {
                message: "worker pool stopped before fetch".to_string(),
            },
        );
        let _ = tx.try_send(result);
    }
}

/// Runs one task through the full pipeline: size check, rate-limit permit,
/// fetch, content filters
async fn process_task(pool: &FetchPool, worker_id: usize, task: &FetchTask) -> FetchResult {
    let start = Instant::now();
    let inner = &pool.inner;

    // Oversize files are rejected before any fetch is issued
    if let Some(failure) = inner.filter.check_size(task) {
        crate::metrics::record_error("file_too_large", &task.owner, &task.repo);
        crate::metrics::record_file_processed(&task.owner, &task.repo, "skipped_oversize");
        return FetchResult::failed(task, failure);
    }

    // The permit wait is bounded by the per-fetch deadline
    let permit = tokio::time::timeout(
        inner.fetch_timeout,
        inner.limiter.acquire(&inner.cancel),
    )
    .await;
    match permit {
        Ok(Ok(())) => {}
        Ok(Err(_)) => {
            return FetchResult::failed(
                task,
                FetchFailure::FetchError {
                    message: "request cancelled".to_string(),
                },
            );
        }
        Err(_) => {
            crate::metrics::record_error("fetch_failed", &task.owner, &task.repo);
            crate::metrics::record_file_processed(&task.owner, &task.repo, "failed");
            return FetchResult::failed(
                task,
                FetchFailure::FetchError {
                    message: "timed out waiting for rate limit permit".to_string(),
                },
            );
        }
    }

    let content = match inner
        .client
        .fetch_blob(&task.owner, &task.repo, &task.path, &task.ref_name, &inner.cancel)
        .await
    {
        Ok(content) => content,
        Err(e) => {
            crate::metrics::record_error("fetch_failed", &task.owner, &task.repo);
            crate::metrics::record_file_processed(&task.owner, &task.repo, "failed");
            tracing::warn!(worker_id, path = %task.path, error = %e, "failed to fetch file");
            return FetchResult::failed(
                task,
                FetchFailure::FetchError {
                    message: e.to_string(),
                },
            );
        }
    };

    match inner.filter.decode_text(content) {
        Ok(text) => {
            crate::metrics::record_file_processed(&task.owner, &task.repo, "success");
            crate::metrics::record_file_size(&task.owner, &task.repo, text.len() as u64);
            crate::metrics::record_task_duration("file_fetch", start.elapsed().as_secs_f64());
            tracing::debug!(worker_id, path = %task.path, bytes = text.len(), "fetched file");
            FetchResult::success(task, text)
        }
        Err(failure @ FetchFailure::BinarySkipped) => {
            crate::metrics::record_error("binary_file_skipped", &task.owner, &task.repo);
            crate::metrics::record_file_processed(&task.owner, &task.repo, "skipped_binary");
            tracing::debug!(worker_id, path = %task.path, "skipped binary file");
            FetchResult::failed(task, failure)
        }
        Err(failure) => {
            crate::metrics::record_error("invalid_utf8", &task.owner, &task.repo);
            crate::metrics::record_file_processed(
                &task.owner,
                &task.repo,
                "skipped_invalid_encoding",
            );
            tracing::debug!(worker_id, path = %task.path, "skipped non-UTF-8 file");
            FetchResult::failed(task, failure)
        }
    }
}
