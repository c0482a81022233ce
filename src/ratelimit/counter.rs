//! Fixed-window counter backing the in-memory limiter.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A counter that tracks permits taken within a fixed window.
///
/// The count is atomic. Every access checks the window start under a mutex
/// and resets the count once the window has elapsed.
#[derive(Debug)]
pub struct RateLimitCounter {
    /// Permits taken in the current window
    count: AtomicU64,
    /// Permits allowed per window
    limit: u64,
    /// Window length
    window: Duration,
    /// When the current window started
    window_start: Mutex<Instant>,
}

impl RateLimitCounter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            count: AtomicU64::new(0),
            limit,
            window,
            window_start: Mutex::new(Instant::now()),
        }
    }

    /// Take `hits` permits.
    ///
    /// Returns `true` if the request is within the limit, `false` if over limit.
    pub fn increment(&self, hits: u64) -> bool {
        self.maybe_reset_window();

        let new_count = self.count.fetch_add(hits, Ordering::SeqCst) + hits;
        new_count <= self.limit
    }

    pub fn current_count(&self) -> u64 {
        self.maybe_reset_window();
        self.count.load(Ordering::SeqCst)
    }

    fn maybe_reset_window(&self) {
        let mut window_start = self.window_start.lock();
        if window_start.elapsed() >= self.window {
            self.count.store(0, Ordering::SeqCst);
            *window_start = Instant::now();
        }
    }
}
