//! Process-local ephemeral caches
//!
//! Three caches back the transaction core: a TTL-bounded currency-rate
//! cache, an idempotency cache that makes retried side-effecting requests
//! safe to resend, and a fixed-window rate limiter. All are in-process:
//! they improve latency and provide best-effort idempotency/throttling but
//! are not a durability guarantee. Each one is constructed once and shared
//! by handle; none of them hides behind module-level state.

pub mod currency;
pub mod idempotency;
pub mod rate_limit;

use std::time::{Duration, Instant};

/// A cached value together with its insertion time and lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    /// An entry is valid while `now - cached_at < ttl`.
    pub fn is_valid(&self, now: Instant) -> bool {
        now.duration_since(self.cached_at) < self.ttl
    }
}
