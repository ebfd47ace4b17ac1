//! Process memory monitoring and backpressure
//!
//! A periodic sampler reads the process resident set from `/proc/self/status`
//! and compares it against a ceiling derived from total system memory. When
//! usage crosses the high watermark the worker pool is paused; it resumes
//! once usage falls below the low watermark (hysteresis keeps the pool from
//! flapping). On hosts without procfs the monitor disables itself.

use crate::config::MemoryConfig;
use crate::pool::FetchPool;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the resident set is sampled
const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Fraction of the ceiling above which pressure is declared
const HIGH_WATERMARK: f64 = 0.9;

/// Fraction of the ceiling below which pressure is relieved
const LOW_WATERMARK: f64 = 0.7;

/// Last observed memory state
#[derive(Debug, Clone, Copy)]
pub struct MemoryState {
    pub resident_bytes: u64,
    pub ceiling_bytes: u64,
    pub pressure: bool,
}

/// Handle to a running memory monitor
pub struct MemoryMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryMonitor {
    /// Spawns the sampling loop if monitoring is enabled and the platform
    /// exposes the needed counters
    ///
    /// Returns `None` when the monitor is disabled by configuration or when
    /// total system memory cannot be determined; the pool then runs with
    /// queue-depth backpressure only.
    pub fn spawn(
        config: &MemoryConfig,
        pool: FetchPool,
        pressure: Arc<AtomicBool>,
    ) -> Option<Self> {
        if !config.enable_memory_monitor {
            return None;
        }

        let Some(total) = read_system_memory_bytes() else {
            tracing::warn!("cannot read total system memory; memory monitor disabled");
            return None;
        };

        let ceiling = (total as f64 * config.memory_limit_fraction) as u64;
        let state = Arc::new(Mutex::new(MemoryState {
            resident_bytes: 0,
            ceiling_bytes: ceiling,
            pressure: false,
        }));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_monitor(
            cancel.clone(),
            pool,
            pressure,
            Arc::clone(&state),
            ceiling,
        ));

        tracing::info!(
            ceiling_mb = ceiling / 1024 / 1024,
            "memory monitor started"
        );

        Some(Self {
            cancel,
            handle,
            state,
        })
    }

    /// Last sampled state
    pub fn state(&self) -> MemoryState {
        *self.state.lock().expect("memory state lock poisoned")
    }

    /// Stops the sampling loop and waits for it to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn run_monitor(
    cancel: CancellationToken,
    pool: FetchPool,
    pressure: Arc<AtomicBool>,
    state: Arc<Mutex<MemoryState>>,
    ceiling: u64,
) {
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    ticker.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(resident) = read_self_rss_bytes() else {
            tracing::warn!("failed to sample resident memory");
            continue;
        };

        crate::metrics::set_memory_resident_bytes(resident);

        let was_pressured = pressure.load(Ordering::Acquire);
        match next_pressure_state(resident, ceiling, was_pressured) {
            Some(true) => {
                pressure.store(true, Ordering::Release);
                pool.pause();
                // No heap-compaction hook exists in this runtime; the pause
                // itself is what sheds load
                tracing::warn!(
                    resident_mb = resident / 1024 / 1024,
                    ceiling_mb = ceiling / 1024 / 1024,
                    "memory pressure detected, pausing workers"
                );
            }
            Some(false) => {
                pressure.store(false, Ordering::Release);
                pool.resume();
                tracing::info!(
                    resident_mb = resident / 1024 / 1024,
                    ceiling_mb = ceiling / 1024 / 1024,
                    "memory pressure relieved, resuming workers"
                );
            }
            None => {}
        }

        let mut guard = state.lock().expect("memory state lock poisoned");
        guard.resident_bytes = resident;
        guard.pressure = pressure.load(Ordering::Acquire);
    }
}

/// Computes the pressure transition for a sample, if any
///
/// Pressure turns on above `HIGH_WATERMARK` of the ceiling and off below
/// `LOW_WATERMARK`; samples in between keep the current state.
fn next_pressure_state(resident: u64, ceiling: u64, currently_pressured: bool) -> Option<bool> {
    let resident = resident as f64;
    let ceiling = ceiling as f64;

    if !currently_pressured && resident > ceiling * HIGH_WATERMARK {
        Some(true)
    } else if currently_pressured && resident < ceiling * LOW_WATERMARK {
        Some(false)
    } else {
        None
    }
}

/// Reads this process's resident set size in bytes from `/proc/self/status`
pub fn read_self_rss_bytes() -> Option<u64> {
    let contents = std::fs::read_to_string(Path::new("/proc/self/status")).ok()?;
    parse_vm_rss_bytes(&contents)
}

/// Reads total system memory in bytes from `/proc/meminfo`
pub fn read_system_memory_bytes() -> Option<u64> {
    let contents = std::fs::read_to_string(Path::new("/proc/meminfo")).ok()?;
    parse_mem_total_bytes(&contents)
}

/// Parses the `VmRSS:` line of `/proc/self/status` (value is in kB)
fn parse_vm_rss_bytes(contents: &str) -> Option<u64> {
    parse_kb_line(contents, "VmRSS:")
}

/// Parses the `MemTotal:` line of `/proc/meminfo` (value is in kB)
fn parse_mem_total_bytes(contents: &str) -> Option<u64> {
    parse_kb_line(contents, "MemTotal:")
}

fn parse_kb_line(contents: &str, prefix: &str) -> Option<u64> {
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix(prefix) {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}
