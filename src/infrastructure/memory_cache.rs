//! In-memory TTL cache.
//!
//! The fallback implementation of the `Cache` port, used when no remote
//! cache is configured (or reachable). Expired entries are dropped lazily
//! on read and by a periodic sweeper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::domain::{Cache, CoreResult};
use crate::support::shutdown::ShutdownSignal;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct MemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Spawn the periodic sweep of expired entries.
    pub fn start_sweeper(self: &Arc<Self>, shutdown: ShutdownSignal) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DEFAULT_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let before = cache.entries.len();
                        let now = Instant::now();
                        cache.entries.retain(|_, (_, deadline)| *deadline > now);
                        let removed = before - cache.entries.len();
                        if removed > 0 {
                            debug!(removed, "Cache sweep removed expired entries");
                        }
                    }
                    _ = shutdown.notified().wait() => {
                        info!("Cache sweeper shutting down");
                        break;
                    }
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        // The shard guard must be released before a removal on the same key.
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > Instant::now() => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<()> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_is_gone_on_read() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }
}
