//! Sliding-window rate limiter shared by registry clients.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

/// Blocks callers so that at most `max_calls` calls start within any `window`.
///
/// Waiting is not an error: [`RateLimiter::acquire`] sleeps the calling thread until
/// a slot frees up. Share one instance behind an `Arc` to share a budget.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// The registry's published budget: 5 calls per 3 seconds.
    pub fn uldk_default() -> Self {
        Self::new(5, Duration::from_secs(3))
    }

    pub const fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Take a slot, sleeping until one is available. Returns the time spent waiting.
    pub fn acquire(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            let Some(wait) = self.try_acquire_at(Instant::now()) else {
                return waited;
            };
            trace!(wait_ms = wait.as_millis(), "Rate limit reached, sleeping");
            std::thread::sleep(wait);
            waited += wait;
        }
    }

    /// Take a slot if one is free; otherwise return how long until the oldest call
    /// leaves the window.
    fn try_acquire_at(&self, now: Instant) -> Option<Duration> {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(&oldest) = calls.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
        if calls.len() < self.max_calls {
            calls.push_back(now);
            return None;
        }
        calls
            .front()
            .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
    }
}
