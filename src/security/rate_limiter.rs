//! Sliding-window rate limiting for the persistence gateway.
//!
//! One window per principal; stale principals are swept periodically so
//! the map cannot grow without bound. Exceeding the limit produces a
//! distinguishable rejection, never a silent drop.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Sliding window used by gateway rate limiting.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// How often the limiter sweeps stale principal entries from its map.
const SWEEP_INTERVAL_SECS: u64 = 300;

#[derive(Debug)]
struct SlidingWindowRateLimiter {
    limit_per_window: u32,
    window: Duration,
    requests: Mutex<(HashMap<String, Vec<Instant>>, Instant)>,
}

impl SlidingWindowRateLimiter {
    fn new(limit_per_window: u32, window: Duration) -> Self {
        Self {
            limit_per_window,
            window,
            requests: Mutex::new((HashMap::new(), Instant::now())),
        }
    }

    fn allow(&self, key: &str) -> bool {
        if self.limit_per_window == 0 {
            return true;
        }

        let now = Instant::now();
        let cutoff = now.checked_sub(self.window).unwrap_or_else(Instant::now);

        let mut guard = self.requests.lock();
        let (requests, last_sweep) = &mut *guard;

        // Periodic sweep: remove principals with no recent requests.
        if last_sweep.elapsed() >= Duration::from_secs(SWEEP_INTERVAL_SECS) {
            requests.retain(|_, timestamps| {
                timestamps.retain(|t| *t > cutoff);
                !timestamps.is_empty()
            });
            *last_sweep = now;
        }

        let entry = requests.entry(key.to_owned()).or_default();
        entry.retain(|instant| *instant > cutoff);

        if entry.len() >= self.limit_per_window as usize {
            return false;
        }

        entry.push(now);
        true
    }
}

/// Per-principal limits for the gateway's write path.
#[derive(Debug)]
pub struct GatewayRateLimiter {
    save_batch: SlidingWindowRateLimiter,
}

impl GatewayRateLimiter {
    /// `batches_per_minute == 0` disables limiting.
    pub fn new(batches_per_minute: u32) -> Self {
        Self {
            save_batch: SlidingWindowRateLimiter::new(
                batches_per_minute,
                Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            ),
        }
    }

    pub fn allow_save(&self, principal_key: &str) -> bool {
        self.save_batch.allow(principal_key)
    }
}

// ── Tests ───────────────────────────────────────────────────────
