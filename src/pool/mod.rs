//! Task scheduler and worker pool
//!
//! This module owns the concurrent fetch engine:
//! - A bounded task channel feeding a fixed set of worker tasks
//! - A result channel of equal capacity fanned back in to the orchestrator
//! - Pause/resume with an overflow buffer, so tasks are never dropped
//! - Backpressure on submission when the queue or process memory runs hot
//! - Deterministic drain on stop: every queued or buffered task is turned
//!   into a synthetic failure result so collectors can terminate

mod worker;

use crate::config::{Config, PoolConfig};
use crate::filter::ContentFilter;
use crate::github::GithubClient;
use crate::limiter::AdaptiveRateLimiter;
use crate::model::{FetchFailure, FetchResult, FetchTask};
use crate::CrawlerError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a blocked submitter sleeps between channel-full retries and
/// backpressure drain polls
const SUBMIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Consecutive no-progress polls after which a backpressure pause resumes
/// even though the queue has not reached the drain target
const STALL_POLL_LIMIT: u32 = 5;

struct PoolInner {
    config: PoolConfig,
    fetch_timeout: Duration,
    client: Arc<GithubClient>,
    limiter: Arc<AdaptiveRateLimiter>,
    filter: Arc<ContentFilter>,
    memory_pressure: Arc<AtomicBool>,

    /// Task channel sender; `None` once the pool is stopped
    task_tx: Mutex<Option<mpsc::Sender<FetchTask>>>,
    task_rx: tokio::sync::Mutex<mpsc::Receiver<FetchTask>>,

    /// Result channel sender; `None` once the pool is stopped
    result_tx: Mutex<Option<mpsc::Sender<FetchResult>>>,
    result_rx: tokio::sync::Mutex<mpsc::Receiver<FetchResult>>,

    cancel: CancellationToken,

    paused: AtomicBool,
    /// Broadcasts the paused flag; workers and submitters wait on it
    pause_tx: watch::Sender<bool>,

    /// Tasks absorbed while the pool is paused, drained in arrival order
    overflow: Mutex<VecDeque<FetchTask>>,

    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    active_workers: AtomicUsize,
}

/// Cheap clonable handle to the worker pool
#[derive(Clone)]
pub struct FetchPool {
    inner: Arc<PoolInner>,
}

impl FetchPool {
    /// Creates an idle pool; call [`FetchPool::start`] to spawn workers
    pub fn new(
        config: &Config,
        client: Arc<GithubClient>,
        limiter: Arc<AdaptiveRateLimiter>,
        filter: Arc<ContentFilter>,
        memory_pressure: Arc<AtomicBool>,
    ) -> Self {
        let capacity = config.pool.max_concurrent_fetches;
        let (task_tx, task_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);
        let (pause_tx, _) = watch::channel(false);

        crate::metrics::set_worker_pool_size(config.pool.max_workers);

        Self {
            inner: Arc::new(PoolInner {
                config: config.pool.clone(),
                fetch_timeout: config.fetch_timeout(),
                client,
                limiter,
                filter,
                memory_pressure,
                task_tx: Mutex::new(Some(task_tx)),
                task_rx: tokio::sync::Mutex::new(task_rx),
                result_tx: Mutex::new(Some(result_tx)),
                result_rx: tokio::sync::Mutex::new(result_rx),
                cancel: CancellationToken::new(),
                paused: AtomicBool::new(false),
                pause_tx,
                overflow: Mutex::new(VecDeque::with_capacity(config.pool.task_buffer_size)),
                workers: tokio::sync::Mutex::new(Vec::new()),
                active_workers: AtomicUsize::new(0),
            }),
        }
    }

    /// Spawns the configured number of workers
    pub async fn start(&self) -> Result<(), CrawlerError> {
        let mut workers = self.inner.workers.lock().await;

        if !workers.is_empty() {
            return Err(CrawlerError::PoolAlreadyRunning);
        }
        if self.inner.task_tx.lock().expect("task sender lock poisoned").is_none() {
            // A stopped pool does not restart
            return Err(CrawlerError::PoolNotRunning);
        }

        for worker_id in 0..self.inner.config.max_workers {
            let pool = self.clone();
            workers.push(tokio::spawn(worker::run(pool, worker_id)));
        }

        self.inner
            .active_workers
            .store(workers.len(), Ordering::Release);
        crate::metrics::set_worker_pool_size(workers.len());
        tracing::info!(count = workers.len(), "started workers");

        Ok(())
    }

    /// Stops the pool: cancels workers, drains them, and flushes every queued
    /// or buffered task as a synthetic failure result
    pub async fn stop(&self) -> Result<(), CrawlerError> {
        self.inner.cancel.cancel();

        // Close the task channel so idle workers fall out of recv
        let _closed = self
            .inner
            .task_tx
            .lock()
            .expect("task sender lock poisoned")
            .take();
        drop(_closed);

        // Wait for all workers to exit
        {
            let mut workers = self.inner.workers.lock().await;
            for handle in workers.drain(..) {
                let _ = handle.await;
            }
        }
        self.inner.active_workers.store(0, Ordering::Release);
        crate::metrics::set_worker_pool_size(0);

        // Collect orphans: tasks still on the channel, then the overflow
        // buffer, in that order
        let mut leftovers = Vec::new();
        {
            let mut rx = self.inner.task_rx.lock().await;
            while let Ok(task) = rx.try_recv() {
                leftovers.push(task);
            }
        }
        leftovers.extend(
            self.inner
                .overflow
                .lock()
                .expect("overflow lock poisoned")
                .drain(..),
        );

        // Emit a synthetic result per orphan so any in-flight collector can
        // account for every submitted task, then close the result channel
        let result_tx = self
            .inner
            .result_tx
            .lock()
            .expect("result sender lock poisoned")
            .take();
        if let Some(tx) = result_tx {
            for task in leftovers {
                let result = FetchResult::failed(
                    &task,
                    FetchFailure::CrawlFailed {
                        message: "worker pool stopped before fetch".to_string(),
                    },
                );
                self.flush_result(&tx, result).await;
            }
        }

        tracing::info!("worker pool stopped");
        Ok(())
    }

    /// Forces a result onto the channel, discarding the oldest unread result
    /// if no collector is draining it
    async fn flush_result(&self, tx: &mpsc::Sender<FetchResult>, result: FetchResult) {
        let mut pending = result;
        loop {
            match tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(r)) => {
                    pending = r;
                    let _ = self.inner.result_rx.lock().await.try_recv();
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }

    /// Submits a task for fetching
    ///
    /// The task is guaranteed to end up on the task channel exactly once, or
    /// in the overflow buffer (from which `stop` flushes it), or this returns
    /// the cancellation error. `queue full` is never surfaced to callers.
    pub async fn submit(
        &self,
        task: FetchTask,
        cancel: &CancellationToken,
    ) -> Result<(), CrawlerError> {
        // Paused: buffer and wait for resume; the drain delivers the task
        if self.inner.paused.load(Ordering::Acquire) {
            return self.buffer_while_paused(task, cancel).await;
        }

        // Memory pressure: back off proportionally to the queue depth
        if self.inner.memory_pressure.load(Ordering::Acquire) {
            let depth = self.queue_depth() as f64;
            let capacity = self.inner.config.max_concurrent_fetches as f64;
            let backoff = Duration::from_secs_f64(1.0 + depth / capacity);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return Err(CrawlerError::Cancelled),
                _ = self.inner.cancel.cancelled() => return Err(CrawlerError::Cancelled),
            }
        }

        // Queue-depth backpressure: pause the pool and poll until the queue
        // drains to half the threshold
        let threshold =
            self.inner.config.max_concurrent_fetches as f64 * self.inner.config.backpressure_threshold;
        if self.queue_depth() as f64 >= threshold {
            self.pause();
            let mut last_depth = self.queue_depth();
            let mut stalled = 0u32;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SUBMIT_POLL_INTERVAL) => {}
                    _ = cancel.cancelled() => {
                        // Do not leave the pool wedged by a cancelled submitter
                        self.resume();
                        return Err(CrawlerError::Cancelled);
                    }
                    _ = self.inner.cancel.cancelled() => {
                        self.resume();
                        return Err(CrawlerError::Cancelled);
                    }
                }
                let depth = self.queue_depth();
                if (depth as f64) < threshold / 2.0 {
                    break;
                }
                // Paused workers park after one dequeue without fetching, so
                // the queue can stop shrinking before it reaches the drain
                // target; resume once it stalls rather than waiting forever
                if depth == last_depth {
                    stalled += 1;
                    if stalled >= STALL_POLL_LIMIT {
                        break;
                    }
                } else {
                    stalled = 0;
                    last_depth = depth;
                }
            }
            self.resume();
        }

        // Place the task on the channel, waiting out full-channel intervals
        let Some(tx) = self.sender() else {
            return Err(CrawlerError::PoolNotRunning);
        };
        let mut task = task;
        loop {
            match tx.try_send(task) {
                Ok(()) => {
                    crate::metrics::set_queue_depth(self.queue_depth());
                    return Ok(());
                }
                Err(TrySendError::Full(t)) => {
                    task = t;
                    tokio::select! {
                        _ = tokio::time::sleep(SUBMIT_POLL_INTERVAL) => {}
                        _ = cancel.cancelled() => return Err(CrawlerError::Cancelled),
                        _ = self.inner.cancel.cancelled() => return Err(CrawlerError::Cancelled),
                    }
                }
                Err(TrySendError::Closed(_)) => return Err(CrawlerError::PoolNotRunning),
            }
        }
    }

    /// Buffers a task while the pool is paused and waits for the resume
    /// signal; on cancellation the task is withdrawn unless the drain has
    /// already claimed it
    async fn buffer_while_paused(
        &self,
        task: FetchTask,
        cancel: &CancellationToken,
    ) -> Result<(), CrawlerError> {
        {
            let mut overflow = self.inner.overflow.lock().expect("overflow lock poisoned");
            overflow.push_back(task.clone());
        }
        crate::metrics::record_error("task_buffered", &task.owner, &task.repo);

        let mut pause_rx = self.inner.pause_tx.subscribe();
        tokio::select! {
            r = pause_rx.wait_for(|paused| !*paused) => match r {
                Ok(_) => Ok(()),
                Err(_) => Err(CrawlerError::PoolNotRunning),
            },
            _ = cancel.cancelled() => {
                let mut overflow = self.inner.overflow.lock().expect("overflow lock poisoned");
                if let Some(pos) = overflow.iter().position(|t| t == &task) {
                    overflow.remove(pos);
                    Err(CrawlerError::Cancelled)
                } else {
                    // The drain already picked it up; it is in flight
                    Ok(())
                }
            }
            _ = self.inner.cancel.cancelled() => {
                // Leave the task buffered; stop() flushes it as a synthetic
                // failure so it is not orphaned
                Err(CrawlerError::Cancelled)
            }
        }
    }

    /// Pauses the pool; idempotent
    ///
    /// Returns true if this call performed the transition.
    pub fn pause(&self) -> bool {
        if self
            .inner
            .paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // send_replace stores the value even when nothing subscribes yet
            self.inner.pause_tx.send_replace(true);
            tracing::info!("pausing workers");
            true
        } else {
            false
        }
    }

    /// Resumes the pool and drains the overflow buffer asynchronously
    /// through the normal submission path; idempotent
    pub fn resume(&self) -> bool {
        if self
            .inner
            .paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.pause_tx.send_replace(false);

            let pool = self.clone();
            tokio::spawn(async move { pool.drain_overflow().await });

            tracing::info!("resuming workers");
            true
        } else {
            false
        }
    }

    /// Re-submits buffered tasks in arrival order
    ///
    /// Fresh submissions may interleave; if the pool pauses again mid-drain
    /// the remaining tasks stay buffered for the next resume.
    async fn drain_overflow(&self) {
        loop {
            let task = {
                let mut overflow = self.inner.overflow.lock().expect("overflow lock poisoned");
                overflow.pop_front()
            };
            let Some(task) = task else { break };

            let cancel = self.inner.cancel.clone();
            if let Err(e) = self.submit(task.clone(), &cancel).await {
                tracing::warn!(path = %task.path, error = %e, "failed to resubmit buffered task");
                // Keep the task flushable by stop() unless it is already back
                // in the buffer
                let mut overflow = self.inner.overflow.lock().expect("overflow lock poisoned");
                if !overflow.iter().any(|t| t == &task) {
                    overflow.push_front(task);
                }
                break;
            }
        }
    }

    /// Receives the next published result
    ///
    /// Returns `None` once the pool has stopped and the flushed results have
    /// been consumed.
    pub async fn recv_result(&self) -> Option<FetchResult> {
        let mut rx = self.inner.result_rx.lock().await;
        rx.recv().await
    }

    /// Number of tasks currently on the task channel
    pub fn queue_depth(&self) -> usize {
        let guard = self.inner.task_tx.lock().expect("task sender lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx.max_capacity() - tx.capacity(),
            None => 0,
        }
    }

    /// Number of tasks waiting in the overflow buffer
    pub fn overflow_len(&self) -> usize {
        self.inner
            .overflow
            .lock()
            .expect("overflow lock poisoned")
            .len()
    }

    /// True while workers are alive
    pub fn is_running(&self) -> bool {
        self.inner.active_workers.load(Ordering::Acquire) > 0
    }

    /// True while the pool is paused
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    fn sender(&self) -> Option<mpsc::Sender<FetchTask>> {
        self.inner
            .task_tx
            .lock()
            .expect("task sender lock poisoned")
            .clone()
    }

    fn result_sender(&self) -> Option<mpsc::Sender<FetchResult>> {
        self.inner
            .result_tx
            .lock()
            .expect("result sender lock poisoned")
            .clone()
    }
}
