//! Bounded in-process LRU tier with TTL

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cached entry with TTL
#[derive(Clone)]
struct LocalEntry {
    permissions: Arc<HashSet<String>>,
    cached_at: Instant,
}

impl LocalEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Local permission tier
pub(crate) struct LocalTier {
    entries: Mutex<LruCache<String, LocalEntry>>,
    capacity: NonZeroUsize,
    ttl: Duration,
}

impl LocalTier {
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            ttl,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<HashSet<String>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => Some(entry.permissions.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn put(&self, key: String, permissions: Arc<HashSet<String>>) {
        self.entries.lock().put(
            key,
            LocalEntry {
                permissions,
                cached_at: Instant::now(),
            },
        );
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity.get()
    }
}
