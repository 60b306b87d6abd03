//! Fixed-window rate limiter keyed by (subject, endpoint)
//!
//! Each key owns a counter and a window start. The first request in a
//! window (or after one has elapsed) resets the counter; requests beyond
//! the maximum are rejected with the time remaining in the window as the
//! retry-after hint. A periodic sweep drops windows stale beyond a grace
//! period to bound memory.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        remaining: u32,
        resets_in: Duration,
    },
    Limited {
        retry_after: Duration,
    },
}

struct Window {
    count: u32,
    window_start: Instant,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<(String, String), Window>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    pub async fn check(&self, subject: &str, endpoint: &str) -> RateLimitDecision {
        let now = Instant::now();
        let key = (subject.to_string(), endpoint.to_string());
        let mut windows = self.windows.lock().await;

        let window = windows.entry(key).or_insert(Window {
            count: 0,
            window_start: now,
        });

        if now.duration_since(window.window_start) >= self.window {
            window.count = 1;
            window.window_start = now;
            return RateLimitDecision::Allowed {
                remaining: self.max_requests - 1,
                resets_in: self.window,
            };
        }

        window.count += 1;
        let resets_in = self.window - now.duration_since(window.window_start);
        if window.count <= self.max_requests {
            RateLimitDecision::Allowed {
                remaining: self.max_requests - window.count,
                resets_in,
            }
        } else {
            RateLimitDecision::Limited {
                retry_after: resets_in,
            }
        }
    }

    /// Drop windows stale beyond `grace` past their end.
    pub async fn sweep(&self, grace: Duration) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        let horizon = self.window + grace;
        windows.retain(|_, w| now.duration_since(w.window_start) < horizon);
        before - windows.len()
    }

    pub async fn reset(&self) {
        self.windows.lock().await.clear();
    }
}
