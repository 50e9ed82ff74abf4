//! In-memory TTL cache for read operations with single-flight fetches.
//!
//! Entries expire lazily: an expired entry is dropped by the lookup that
//! finds it or by the next invalidation. Concurrent misses for the same key
//! share one upstream fetch through a pending map.
//!
//! Every invalidation bumps an epoch. A fetch records the epoch when it
//! starts and only stores its result if no invalidation happened since, so a
//! read racing with a write can never repopulate the cache with pre-write
//! data.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Stand-in expiry for TTLs too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct PendingFetch {
    id: u64,
    epoch: u64,
    fetch: SharedFetch,
}

/// Key/value store with per-entry expiry, owned by one client.
#[derive(Default)]
pub struct Cache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    pending: Mutex<HashMap<String, PendingFetch>>,
    epoch: AtomicU64,
    next_fetch_id: AtomicU64,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value if it has not expired; expired entries are removed.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores `value` until `now + ttl`, replacing any previous entry. A zero
    /// TTL stores nothing.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let mut entries = self.entries.lock();
        Self::insert_locked(&mut entries, key, value, ttl);
    }

    pub fn invalidate(&self, key: &str) {
        let now = Instant::now();
        {
            let mut entries = self.entries.lock();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            entries.remove(key);
            entries.retain(|_, entry| entry.is_live(now));
        }
        self.pending.lock().remove(key);
        debug!("Cache invalidated: {}", key);
    }

    /// Removes every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let now = Instant::now();
        {
            let mut entries = self.entries.lock();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            entries.retain(|key, entry| !key.starts_with(prefix) && entry.is_live(now));
        }
        self.pending.lock().retain(|key, _| !key.starts_with(prefix));
        debug!("Cache invalidated with prefix: {}", prefix);
    }

    pub fn clear(&self) {
        {
            let mut entries = self.entries.lock();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            entries.clear();
        }
        self.pending.lock().clear();
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached value for `key` or runs `fetch` to produce it.
    ///
    /// With `use_cache`, concurrent callers missing the same key await one
    /// shared fetch. Without it, the lookup and the pending map are skipped
    /// and a fresh fetch always runs; its result still refreshes the entry.
    /// Errors are never cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        use_cache: bool,
        fetch: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if !use_cache {
            let epoch = self.epoch.load(Ordering::SeqCst);
            let value = fetch().await?;
            self.store_if_current(key, &value, ttl, epoch);
            return Ok(value);
        }

        if let Some(value) = self.get(key) {
            debug!("Cache hit: {}", key);
            return Ok(value);
        }

        let (id, shared) = {
            let mut pending = self.pending.lock();

            // A fetch may have completed between the lookup above and taking
            // the pending lock; completions store before leaving the map.
            if let Some(value) = self.get(key) {
                debug!("Cache hit: {}", key);
                return Ok(value);
            }

            match pending.get(key) {
                Some(inflight) => {
                    debug!("Joining in-flight fetch: {}", key);
                    (inflight.id, inflight.fetch.clone())
                }
                None => {
                    debug!("Cache miss: {}", key);
                    let id = self.next_fetch_id.fetch_add(1, Ordering::SeqCst);
                    let epoch = self.epoch.load(Ordering::SeqCst);
                    let shared = fetch().boxed().shared();
                    pending.insert(
                        key.to_string(),
                        PendingFetch {
                            id,
                            epoch,
                            fetch: shared.clone(),
                        },
                    );
                    (id, shared)
                }
            }
        };

        let mut waiter = Waiter {
            cache: self,
            key,
            id,
            fetch: Some(shared),
        };
        let result = waiter.wait().await;
        self.complete(key, id, &result, ttl);
        result
    }

    /// Number of fetches currently registered for single-flight joining.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Retires pending fetch `id` for `key`, storing its value if no
    /// invalidation happened while it ran. Later waiters find it gone.
    fn complete(&self, key: &str, id: u64, result: &Result<Value>, ttl: Duration) {
        let mut pending = self.pending.lock();
        let Some(inflight) = pending.get(key).filter(|inflight| inflight.id == id) else {
            return;
        };

        if let Ok(value) = result {
            self.store_if_current(key, value, ttl, inflight.epoch);
        }
        pending.remove(key);
    }

    /// Drops pending fetch `id` for `key` once no caller awaits it anymore,
    /// which also releases whatever the fetch was holding.
    fn abandon(&self, key: &str, id: u64) {
        let removed = {
            let mut pending = self.pending.lock();
            let orphaned = pending.get(key).is_some_and(|inflight| {
                inflight.id == id && inflight.fetch.strong_count().is_none_or(|count| count == 1)
            });
            if !orphaned {
                return;
            }
            pending.remove(key)
        };
        debug!("Abandoned fetch for {}: no callers left", key);
        drop(removed);
    }

    fn store_if_current(&self, key: &str, value: &Value, ttl: Duration, epoch: u64) {
        let mut entries = self.entries.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding fetch for {}: invalidated while in flight", key);
            return;
        }
        Self::insert_locked(&mut entries, key, value.clone(), ttl);
    }

    fn insert_locked(
        entries: &mut HashMap<String, CacheEntry>,
        key: &str,
        value: Value,
        ttl: Duration,
    ) {
        if ttl.is_zero() {
            entries.remove(key);
            return;
        }
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + FAR_FUTURE);
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
    }
}

/// One caller's handle on a shared fetch.
///
/// Dropped before the fetch resolves, e.g. because the caller was cancelled,
/// the last such handle retires the fetch from the pending map.
struct Waiter<'a> {
    cache: &'a Cache,
    key: &'a str,
    id: u64,
    fetch: Option<SharedFetch>,
}

impl Waiter<'_> {
    async fn wait(&mut self) -> Result<Value> {
        let result = match self.fetch.as_mut() {
            Some(fetch) => fetch.await,
            None => Err(Error::Cancelled),
        };
        self.fetch = None;
        result
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let Some(fetch) = self.fetch.take() else {
            return;
        };
        // Our handle must be gone before counting the remaining ones.
        drop(fetch);
        self.cache.abandon(self.key, self.id);
    }
}
