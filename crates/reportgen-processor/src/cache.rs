//! TTL fetch cache with in-flight deduplication.
//!
//! At most one fetch per fingerprint runs at a time; concurrent callers await
//! the same shared future. Only successful fetches are inserted, and the
//! insert happens under the in-flight lock so a waiter never observes a slot
//! that is neither cached nor in flight.
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reportgen_core::{Fingerprint, ReportError, Result, Table};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

type SharedFetch = Shared<BoxFuture<'static, std::result::Result<Arc<Table>, ReportError>>>;

struct CacheEntry {
    table: Arc<Table>,
    expires_at: Instant,
}

/// How a `get_or_fetch` call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    /// Awaited a fetch another caller started.
    Joined,
    Miss,
    /// TTL of zero; the cache was not consulted.
    Bypass,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub joins: u64,
    pub misses: u64,
}

#[derive(Default)]
pub struct FetchCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    in_flight: Mutex<HashMap<Fingerprint, SharedFetch>>,
    hits: AtomicU64,
    joins: AtomicU64,
    misses: AtomicU64,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: Fingerprint,
        ttl: Duration,
        fetch: F,
    ) -> Result<(Arc<Table>, CacheStatus)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Table>> + Send + 'static,
    {
        if ttl.is_zero() {
            return fetch().await.map(|t| (Arc::new(t), CacheStatus::Bypass));
        }
        if let Some(table) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %key, "cache hit");
            return Ok((table, CacheStatus::Hit));
        }

        let (shared, status) = {
            let mut in_flight = self.in_flight.lock();
            // A fetch may have completed between the lookup and the lock.
            if let Some(table) = self.lookup(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((table, CacheStatus::Hit));
            }
            match in_flight.get(&key) {
                Some(existing) => {
                    self.joins.fetch_add(1, Ordering::Relaxed);
                    (existing.clone(), CacheStatus::Joined)
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let fut = fetch();
                    let shared = async move { fut.await.map(Arc::new) }.boxed().shared();
                    in_flight.insert(key.clone(), shared.clone());
                    (shared, CacheStatus::Miss)
                }
            }
        };
        debug!(fingerprint = %key, status = ?status, "awaiting fetch");

        let result = shared.clone().await;
        self.settle(&key, &shared, &result, ttl);
        result.map(|table| (table, status))
    }

    /// Clear the in-flight slot and cache the result. Whichever waiter
    /// finishes first does this, so a cancelled leader cannot strand the slot.
    fn settle(
        &self,
        key: &Fingerprint,
        shared: &SharedFetch,
        result: &std::result::Result<Arc<Table>, ReportError>,
        ttl: Duration,
    ) {
        let mut in_flight = self.in_flight.lock();
        let ours = in_flight.get(key).map(|f| f.ptr_eq(shared)).unwrap_or(false);
        if !ours {
            return;
        }
        in_flight.remove(key);
        if let Ok(table) = result {
            self.entries.insert(
                key.clone(),
                CacheEntry {
                    table: table.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    fn lookup(&self, key: &Fingerprint) -> Option<Arc<Table>> {
        let now = Instant::now();
        let fresh = self.entries.get(key).map(|e| {
            if e.expires_at > now {
                Some(e.table.clone())
            } else {
                None
            }
        })?;
        if fresh.is_none() {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        fresh
    }

    pub fn invalidate(&self, key: &Fingerprint) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Cached entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
