//! Result cache: normalized domain → most recent report, with TTL
//!
//! Expiry is TTL-from-write. Expired entries read as a miss and are removed
//! on that lookup; [`ResultCache::spawn_sweeper`] also evicts them
//! periodically. Losing the cache never loses a report (the store is the
//! durable copy).

use crate::models::Report;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct CacheEntry {
    report: Arc<Report>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    // Entries hold no invariants across a panic, so a poisoned lock is
    // still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Live report for `key`, if any
    pub fn get(&self, key: &str) -> Option<Arc<Report>> {
        let now = Instant::now();
        {
            let entries = self.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.is_live(now) => return Some(entry.report.clone()),
                Some(_) => {}
            }
        }

        // Lazy eviction; re-check in case a fresh put landed meanwhile
        let mut entries = self.write();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
            debug!(domain = %key, "Evicted expired cache entry");
        }
        None
    }

    /// Store `report` under `key` for `ttl` (last write wins)
    pub fn put(&self, key: impl Into<String>, report: Arc<Report>, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.write().insert(key.into(), CacheEntry { report, expires_at });
    }

    /// Drop the entry for `key`; returns whether one existed
    pub fn invalidate(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// Remove every expired entry; returns how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.read().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep every `interval` until `shutdown` is cancelled
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            info!(removed, remaining = self.len(), "Swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}
