//! In-memory cache map with expiry, durable write-through, and
//! periodic sweeping.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{disk::DiskMirror, COLLECTION_PREFIX};

/// A cached value together with its lifetime stamps.
///
/// `expires_at > created_at` holds for every entry produced by
/// [`CacheStore::set`]; an entry is live iff `now <= expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached value.
    pub data: T,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
    /// Moment after which the entry must not be returned.
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// Aggregate counters over the in-memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held in memory, live or not.
    pub total_entries: usize,
    /// Entries whose expiry has passed but were not swept yet.
    pub expired_entries: usize,
    /// Entries under the collection key prefix.
    pub collection_entries: usize,
}

/// Key/value store with per-entry TTL and a best-effort durable
/// mirror.
///
/// The in-memory map is the source of truth within a session; disk
/// failures are logged and swallowed so the store stays functional
/// when persistence is unavailable. Clones share the same map.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<RwLock<HashMap<String, CacheEntry<Value>>>>,
    disk: DiskMirror,
}

impl CacheStore {
    /// Open a store rooted at the given mirror directory, hydrating
    /// still-live entries persisted by earlier sessions.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let disk = DiskMirror::new(root);
        let mut map = HashMap::new();
        let now = Utc::now();
        match disk.load_all() {
            Ok(entries) => {
                for (key, entry) in entries {
                    if entry.is_live(now) {
                        map.insert(key, entry);
                    } else {
                        debug!("dropping expired mirrored entry {key}");
                        if let Err(err) = disk.remove(&key) {
                            warn!("failed to drop expired cache file for {key}: {err}");
                        }
                    }
                }
            }
            Err(err) => warn!("failed to hydrate cache mirror: {err}"),
        }
        Self {
            inner: Arc::new(RwLock::new(map)),
            disk,
        }
    }

    /// Insert or overwrite an entry with the given time-to-live.
    /// Collection keys are mirrored to disk immediately.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(err) => {
                warn!("refusing to cache unserializable value for {key}: {err}");
                return;
            }
        };
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let entry = CacheEntry {
            data,
            created_at: now,
            expires_at: now + ttl,
        };
        if key.starts_with(COLLECTION_PREFIX) {
            if let Err(err) = self.disk.write(key, &entry) {
                warn!("failed to mirror cache entry {key}: {err}");
            }
        }
        self.inner.write().insert(key.to_string(), entry);
    }

    /// Fetch the live value under `key`, if any.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.live_entry(key)?;
        match serde_json::from_value(entry.data) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("cached value under {key} has an unexpected shape: {err}");
                None
            }
        }
    }

    /// True when a live value exists under `key`.
    pub fn has(&self, key: &str) -> bool {
        self.live_entry(key).is_some()
    }

    /// Remove an entry from memory and disk.
    pub fn delete(&self, key: &str) {
        self.inner.write().remove(key);
        if let Err(err) = self.disk.remove(key) {
            warn!("failed to remove mirrored entry {key}: {err}");
        }
    }

    /// Wipe every entry this store owns. Only namespaced mirror files
    /// are deleted; unrelated files in the cache directory survive.
    pub fn clear(&self) {
        self.inner.write().clear();
        if let Err(err) = self.disk.clear() {
            warn!("failed to clear cache mirror: {err}");
        }
    }

    /// Age of the live entry under `key`, or `None` when missing or
    /// expired.
    pub fn entry_age(&self, key: &str) -> Option<Duration> {
        let entry = self.live_entry(key)?;
        (Utc::now() - entry.created_at).to_std().ok()
    }

    /// Timestamp at which the live entry under `key` was written.
    pub fn created_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.live_entry(key).map(|entry| entry.created_at)
    }

    /// True when the entry is absent, expired, or older than
    /// `max_age`.
    pub fn is_stale(&self, key: &str, max_age: Duration) -> bool {
        match self.entry_age(key) {
            Some(age) => age > max_age,
            None => true,
        }
    }

    /// Evict every expired entry from memory and disk.
    pub fn sweep(&self) {
        let now = Utc::now();
        let dead: Vec<String> = {
            let map = self.inner.read();
            map.iter()
                .filter(|(_, entry)| !entry.is_live(now))
                .map(|(key, _)| key.clone())
                .collect()
        };
        if dead.is_empty() {
            return;
        }
        debug!("sweeping {} expired cache entries", dead.len());
        for key in dead {
            self.evict_if_dead(&key, now);
        }
    }

    /// Run [`CacheStore::sweep`] on a fixed interval until the
    /// returned handle is aborted or dropped by the runtime.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a sweep
            // never races construction-time hydration.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.sweep();
            }
        })
    }

    /// Counters describing the in-memory map.
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let map = self.inner.read();
        let mut stats = CacheStats {
            total_entries: map.len(),
            expired_entries: 0,
            collection_entries: 0,
        };
        for (key, entry) in map.iter() {
            if !entry.is_live(now) {
                stats.expired_entries += 1;
            }
            if key.starts_with(COLLECTION_PREFIX) {
                stats.collection_entries += 1;
            }
        }
        stats
    }

    /// Return the live entry under `key`, purging dead entries it
    /// observes in memory or on disk, and hydrating from disk on an
    /// in-memory miss.
    fn live_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        let now = Utc::now();
        {
            let map = self.inner.read();
            if let Some(entry) = map.get(key) {
                if entry.is_live(now) {
                    return Some(entry.clone());
                }
            } else {
                drop(map);
                return self.hydrate(key, now);
            }
        }
        // Entry observed dead: purge it everywhere, unless a
        // concurrent set replaced it between the two locks.
        if self.evict_if_dead(key, now) {
            return None;
        }
        let map = self.inner.read();
        map.get(key).filter(|entry| entry.is_live(now)).cloned()
    }

    /// Remove `key` only if the stored entry is still dead at `now`.
    /// The re-check runs under the write lock, so a value committed
    /// after the caller observed a dead entry is never evicted.
    fn evict_if_dead(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut map = self.inner.write();
        let still_dead = map.get(key).is_some_and(|entry| !entry.is_live(now));
        if !still_dead {
            return false;
        }
        map.remove(key);
        drop(map);
        if let Err(err) = self.disk.remove(key) {
            warn!("failed to purge expired entry {key}: {err}");
        }
        true
    }

    fn hydrate(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry<Value>> {
        match self.disk.read(key) {
            Ok(Some(entry)) if entry.is_live(now) => {
                self.inner.write().insert(key.to_string(), entry.clone());
                Some(entry)
            }
            Ok(Some(_)) => {
                if let Err(err) = self.disk.remove(key) {
                    warn!("failed to purge expired mirrored entry {key}: {err}");
                }
                None
            }
            Ok(None) => None,
            Err(err) => {
                warn!("failed to read cache mirror for {key}: {err}");
                None
            }
        }
    }
}
