//! Currency rate cache
//!
//! Converts a display currency into USD using TTL-bounded rates fetched
//! from the authoritative currency table. USD itself is a fixed identity
//! and is never cached or queried. When the cache is full the
//! oldest-inserted entry is evicted to admit a new one; a periodic sweep
//! independently removes expired entries.

use crate::cache::CacheEntry;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum CurrencyError {
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("rate source error: {0}")]
    Source(String),
}

/// Authoritative source of USD rates, keyed by currency code.
///
/// Backed by the currency table in production; tests inject a counting fake.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Returns `Ok(None)` when the currency code is not known at all.
    async fn usd_rate(&self, code: &str) -> Result<Option<Decimal>, CurrencyError>;
}

struct CurrencyCacheInner {
    entries: HashMap<String, CacheEntry<Decimal>>,
    /// Insertion order for capacity eviction (oldest-inserted first,
    /// deliberately not LRU).
    insertion_order: VecDeque<String>,
}

/// TTL-bounded cache of display-currency → USD rates.
pub struct CurrencyRateCache {
    source: Arc<dyn RateSource>,
    inner: RwLock<CurrencyCacheInner>,
    ttl: Duration,
    capacity: usize,
}

impl CurrencyRateCache {
    pub fn new(source: Arc<dyn RateSource>, ttl: Duration, capacity: usize) -> Self {
        Self {
            source,
            inner: RwLock::new(CurrencyCacheInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
            ttl,
            capacity,
        }
    }

    /// Convert `amount` in `currency` to USD.
    pub async fn convert(&self, currency: &str, amount: Decimal) -> Result<Decimal, CurrencyError> {
        let code = currency.trim().to_uppercase();

        // USD is an identity, never cached or queried.
        if code == "USD" {
            return Ok(amount);
        }

        let rate = self.rate_for(&code).await?;
        Ok(amount * rate)
    }

    async fn rate_for(&self, code: &str) -> Result<Decimal, CurrencyError> {
        let now = Instant::now();
        {
            let inner = self.inner.read().await;
            if let Some(entry) = inner.entries.get(code) {
                if entry.is_valid(now) {
                    debug!(currency = %code, "currency rate served from cache");
                    return Ok(entry.value);
                }
            }
        }

        // Cache miss or expired entry: fall through to the datastore. Two
        // concurrent misses may both fetch and write; the value is
        // idempotent so the race is harmless.
        let rate = self
            .source
            .usd_rate(code)
            .await?
            .ok_or_else(|| CurrencyError::UnknownCurrency(code.to_string()))?;

        self.insert(code, rate).await;
        Ok(rate)
    }

    async fn insert(&self, code: &str, rate: Decimal) {
        let mut inner = self.inner.write().await;

        if !inner.entries.contains_key(code) && inner.entries.len() >= self.capacity {
            // At capacity: evict the oldest-inserted entry.
            while let Some(victim) = inner.insertion_order.pop_front() {
                if inner.entries.remove(&victim).is_some() {
                    warn!(currency = %victim, "currency cache at capacity, evicted oldest entry");
                    break;
                }
            }
        }

        if !inner.entries.contains_key(code) {
            inner.insertion_order.push_back(code.to_string());
        }
        inner
            .entries
            .insert(code.to_string(), CacheEntry::new(rate, self.ttl));
    }

    /// Remove expired entries regardless of capacity pressure.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_valid(now));
        let entries = &inner.entries;
        inner
            .insertion_order
            .retain(|code| entries.contains_key(code));
        before - inner.entries.len()
    }

    /// Drop everything, e.g. after the currency table changes.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.insertion_order.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}
