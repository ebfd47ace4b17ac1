//! Adaptive rate limiting for upstream API requests
//!
//! This module paces outgoing requests with a token bucket of depth one whose
//! refill rate moves with the upstream quota headers: multiplicative decrease
//! when the quota window is nearly consumed, slow time-gated increase when
//! there is plenty of headroom, always clamped to configured bounds.

use crate::config::RateLimitConfig;
use crate::CrawlerError;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Multiplicative step applied when the quota window is nearly consumed
const SLOWDOWN_FACTOR: f64 = 0.5;

/// Used-fraction above which the rate is reduced
const SLOWDOWN_THRESHOLD: f64 = 0.8;

/// Used-fraction below which the rate may be increased
const SPEEDUP_THRESHOLD: f64 = 0.3;

/// Minimum time between consecutive speedups
const SPEEDUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Snapshot of the limiter's adjustable state
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Current permitted rate in requests per second
    pub current_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    /// Multiplicative step for speedup (rate becomes rate * (1 + factor))
    pub speedup_factor: f64,
    /// Multiplicative step for slowdown
    pub slowdown_factor: f64,
    /// When the rate last changed
    pub last_adjustment: Instant,
}

struct Inner {
    state: RateLimitState,
    /// Earliest instant at which the next token is available
    next_free: Instant,
}

/// Token-bucket pacer with a dynamically adjustable rate
///
/// `acquire` serializes callers at the current rate; `observe` moves the rate
/// in response to upstream quota usage.
pub struct AdaptiveRateLimiter {
    inner: Mutex<Inner>,
    adaptive: bool,
}

impl AdaptiveRateLimiter {
    /// Creates a limiter seeded at `hourly_quota / 3600` requests per second,
    /// clamped to the configured bounds
    pub fn new(config: &RateLimitConfig, hourly_quota: u32) -> Self {
        let initial_rate =
            (hourly_quota as f64 / 3600.0).clamp(config.min_rate, config.max_rate);

        let now = Instant::now();
        Self {
            inner: Mutex::new(Inner {
                state: RateLimitState {
                    current_rate: initial_rate,
                    min_rate: config.min_rate,
                    max_rate: config.max_rate,
                    speedup_factor: config.adjust_factor,
                    slowdown_factor: SLOWDOWN_FACTOR,
                    last_adjustment: now,
                },
                next_free: now,
            }),
            adaptive: config.enable_adaptive,
        }
    }

    /// Blocks until a token is available or the cancel signal fires
    ///
    /// Callers are paced at the current rate; a token reserved by a caller
    /// that is later cancelled stays consumed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), CrawlerError> {
        let wait = {
            let mut inner = self.inner.lock().expect("rate limiter lock poisoned");
            let now = Instant::now();
            let wait = inner.next_free.saturating_duration_since(now);

            let interval = Duration::from_secs_f64(1.0 / inner.state.current_rate);
            inner.next_free = inner.next_free.max(now) + interval;

            wait
        };

        if wait.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = cancel.cancelled() => Err(CrawlerError::Cancelled),
        }
    }

    /// Adjusts the rate from an observed quota used-fraction
    ///
    /// - used > 0.8: multiplicative slowdown (react quickly to pressure)
    /// - used < 0.3 and >= 5 minutes since the last adjustment: small speedup
    /// - otherwise unchanged
    ///
    /// The result is clamped to `[min_rate, max_rate]`.
    pub fn observe(&self, used_fraction: f64, now: Instant) {
        if !self.adaptive {
            return;
        }

        let mut inner = self.inner.lock().expect("rate limiter lock poisoned");
        let state = &mut inner.state;

        let new_rate = if used_fraction > SLOWDOWN_THRESHOLD {
            state.current_rate * state.slowdown_factor
        } else if used_fraction < SPEEDUP_THRESHOLD
            && now.duration_since(state.last_adjustment) >= SPEEDUP_INTERVAL
        {
            state.current_rate * (1.0 + state.speedup_factor)
        } else {
            return;
        };

        state.current_rate = new_rate.clamp(state.min_rate, state.max_rate);
        state.last_adjustment = now;

        crate::metrics::set_adaptive_rate(state.current_rate);
        tracing::debug!(
            rate = state.current_rate,
            used_fraction,
            "adjusted adaptive rate"
        );
    }

    /// Current permitted rate in requests per second
    pub fn current_rate(&self) -> f64 {
        self.inner
            .lock()
            .expect("rate limiter lock poisoned")
            .state
            .current_rate
    }

    /// Snapshot of the adjustable state
    pub fn snapshot(&self) -> RateLimitState {
        self.inner
            .lock()
            .expect("rate limiter lock poisoned")
            .state
            .clone()
    }
}
