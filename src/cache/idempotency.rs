//! Idempotency cache for side-effecting operations
//!
//! Retried requests for the same operation receive the originally produced
//! result instead of re-executing the side effect. The key is an explicit
//! client-supplied request id when present, otherwise a deterministic
//! fingerprint of the request contents. A true first-writer-wins
//! discipline is enforced: while the first request is still executing,
//! concurrent duplicates are told to retry rather than racing the side
//! effect. Any cache-layer inconsistency is treated as a miss — the
//! operation executes rather than being silently skipped.

use crate::cache::CacheEntry;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Outcome of attempting to begin an idempotent operation.
#[derive(Debug)]
pub enum Begin<T> {
    /// A completed result for this key exists and belongs to this subject.
    Replay(T),
    /// Another request with this key is currently executing.
    InFlight,
    /// No usable entry; the caller must execute the operation and then
    /// either `store` the result or `release` the key on failure.
    Execute,
}

enum Slot<T> {
    InFlight { since: Instant, subject: String },
    Done { subject: String, entry: CacheEntry<T> },
}

/// TTL-bounded cache of previously executed operation results.
pub struct IdempotencyCache<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
    ttl: Duration,
}

impl<T: Clone + Send> IdempotencyCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Derive a deterministic key from the request contents when the client
    /// did not supply an explicit request id.
    pub fn fingerprint(subject: &str, recipient: &str, amount: &str, signature: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(subject.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(recipient.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(amount.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(signature.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up `key` for `subject`, reserving it when absent.
    ///
    /// A stored result is only replayed when it has not expired and the
    /// owning subject matches; otherwise the stale entry is removed and the
    /// key is reserved for this caller.
    pub async fn begin(&self, key: &str, subject: &str) -> Begin<T> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;

        match slots.get(key) {
            Some(Slot::Done {
                subject: owner,
                entry,
            }) if entry.is_valid(now) && owner == subject => {
                debug!(key = %key, "idempotency cache replay");
                return Begin::Replay(entry.value.clone());
            }
            Some(Slot::InFlight { since, .. }) if now.duration_since(*since) < self.ttl => {
                return Begin::InFlight;
            }
            _ => {}
        }

        // Expired, subject mismatch, stale in-flight marker, or absent:
        // drop whatever was there and reserve the key.
        slots.insert(
            key.to_string(),
            Slot::InFlight {
                since: now,
                subject: subject.to_string(),
            },
        );
        Begin::Execute
    }

    /// Record the result produced for a reserved key.
    pub async fn store(&self, key: &str, subject: &str, value: T) {
        let mut slots = self.slots.lock().await;
        slots.insert(
            key.to_string(),
            Slot::Done {
                subject: subject.to_string(),
                entry: CacheEntry::new(value, self.ttl),
            },
        );
    }

    /// Free a reserved key after the operation failed, so a later retry
    /// executes again.
    pub async fn release(&self, key: &str) {
        let mut slots = self.slots.lock().await;
        if matches!(slots.get(key), Some(Slot::InFlight { .. })) {
            slots.remove(key);
        }
    }

    /// Remove expired results and abandoned in-flight markers.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Done { entry, .. } => entry.is_valid(now),
            Slot::InFlight { since, .. } => now.duration_since(*since) < self.ttl,
        });
        before - slots.len()
    }

    pub async fn reset(&self) {
        self.slots.lock().await.clear();
    }
}
