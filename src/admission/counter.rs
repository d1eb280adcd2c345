//! Fixed-window hit counters behind a store seam.
//!
//! Production deployments point this at a shared counter service so limits
//! hold across instances; the in-memory store covers single-node
//! deployments and tests. Either way the increment must be atomic per key.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Atomic increment-with-expiry counters keyed by window.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key`, creating it with
    /// `expires_in` on first hit. Returns the post-increment count.
    async fn increment(&self, key: &str, expires_in: Duration) -> Result<u64, StoreError>;

    /// Current count without incrementing. Missing or expired keys read as
    /// zero.
    async fn peek(&self, key: &str) -> Result<u64, StoreError>;
}

struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// Process-local counter store.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries so abandoned windows do not accumulate.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, expires_in: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.expires_at <= now {
                    entry.count = 0;
                    entry.expires_at = now + expires_in;
                }
            })
            .or_insert(CounterEntry {
                count: 0,
                expires_at: now + expires_in,
            });
        entry.count += 1;
        Ok(entry.count)
    }

    async fn peek(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map_or(0, |entry| entry.count))
    }
}

#[cfg(test)]
mod tests {
    use super::{CounterStore, MemoryCounterStore};
    use anyhow::Result;
    use std::time::Duration;

    #[tokio::test]
    async fn increment_returns_post_increment_count() -> Result<()> {
        let store = MemoryCounterStore::new();
        assert_eq!(store.increment("k", Duration::from_secs(60)).await?, 1);
        assert_eq!(store.increment("k", Duration::from_secs(60)).await?, 2);
        assert_eq!(store.peek("k").await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn keys_count_independently() -> Result<()> {
        let store = MemoryCounterStore::new();
        store.increment("a", Duration::from_secs(60)).await?;
        store.increment("b", Duration::from_secs(60)).await?;
        store.increment("b", Duration::from_secs(60)).await?;
        assert_eq!(store.peek("a").await?, 1);
        assert_eq!(store.peek("b").await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn expired_entries_read_as_zero_and_restart() -> Result<()> {
        let store = MemoryCounterStore::new();
        store.increment("k", Duration::from_millis(0)).await?;
        assert_eq!(store.peek("k").await?, 0);
        // A fresh hit after expiry starts a new window at one.
        assert_eq!(store.increment("k", Duration::from_secs(60)).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn purge_drops_expired_entries() -> Result<()> {
        let store = MemoryCounterStore::new();
        store.increment("stale", Duration::from_millis(0)).await?;
        store.increment("live", Duration::from_secs(60)).await?;
        store.purge_expired().await;
        assert_eq!(store.peek("stale").await?, 0);
        assert_eq!(store.peek("live").await?, 1);
        Ok(())
    }
}
