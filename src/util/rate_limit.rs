//! Per-key rate limiting for noisy log paths
//!
//! A polling loop that fails every second for a quarter of an hour would
//! otherwise produce hundreds of identical warnings. Each connection owns its
//! limiter; there is no process-wide state.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks, per key, when an action last fired and suppresses repeats that
/// come sooner than the key's minimum interval.
pub struct RateLimiter {
    default_interval: Duration,
    intervals: HashMap<String, Duration>,
    last_fired: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// Limiter applying `default_interval` to every key
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            intervals: HashMap::new(),
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// Override the interval for one key
    pub fn with_interval(mut self, key: &str, interval: Duration) -> Self {
        self.intervals.insert(key.to_string(), interval);
        self
    }

    /// Returns true when the action for `key` may fire now, recording the
    /// firing time. Keys are independent of each other.
    pub fn allow(&self, key: &str) -> bool {
        let interval = self
            .intervals
            .get(key)
            .copied()
            .unwrap_or(self.default_interval);

        let now = Instant::now();
        let mut last_fired = self.last_fired.lock();
        match last_fired.get(key) {
            Some(last) if now.duration_since(*last) < interval => false,
            _ => {
                last_fired.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget all recorded firings
    pub fn reset(&self) {
        self.last_fired.lock().clear();
    }
}
