//! Two-tier permission cache with cross-process invalidation
//!
//! L1 is a bounded, short-lived LRU local to the process. L2 is a shared
//! [`SharedCache`] that every node reads and writes. Invalidations delete
//! the local and shared entries, then go out on an [`InvalidationBus`] so
//! every other node purges its own L1.
//!
//! The shared tier is never allowed to fail a caller: reads degrade to
//! "L1 or absent", writes are best-effort, and every such event is logged
//! and counted.

mod bus;
mod local;
mod shared;

#[cfg(feature = "redis")]
pub mod redis;

pub use bus::{InMemoryInvalidationBus, InvalidationBus, InvalidationMessage, INVALIDATE_ALL};
pub use shared::{InMemorySharedCache, SharedCache};

#[cfg(feature = "redis")]
pub use redis::{RedisInvalidationBus, RedisSharedCache};

use crate::config::AuthzConfig;
use crate::error::Result;
use crate::types::UserId;
use futures::StreamExt;
use local::LocalTier;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of local entries
    pub l1_capacity: usize,

    /// Time-to-live for local entries
    pub l1_ttl: Duration,

    /// Default time-to-live for shared entries
    pub l2_ttl: Duration,

    /// Prefix of permission cache keys
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&AuthzConfig::default())
    }
}

impl From<&AuthzConfig> for CacheConfig {
    fn from(config: &AuthzConfig) -> Self {
        Self {
            l1_capacity: config.l1_capacity,
            l1_ttl: config.l1_ttl,
            l2_ttl: config.l2_ttl,
            key_prefix: config.key_prefix.clone(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    /// Shared-tier failures absorbed by falling back
    pub degraded: u64,
    pub invalidations_received: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups served by either tier
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Where a lookup was answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Served from the local tier
    Local(Arc<HashSet<String>>),
    /// Served from the shared tier and backfilled locally
    Shared(Arc<HashSet<String>>),
    /// Absent from both tiers; `degraded` is set when the shared tier failed
    Miss { degraded: bool },
}

impl CacheLookup {
    pub fn into_permissions(self) -> Option<Arc<HashSet<String>>> {
        match self {
            CacheLookup::Local(p) | CacheLookup::Shared(p) => Some(p),
            CacheLookup::Miss { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicU64,
    invalidations_received: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Two-tier cache of resolved permission sets
pub struct PermissionCache {
    local: LocalTier,
    shared: Arc<dyn SharedCache>,
    bus: Arc<dyn InvalidationBus>,
    config: CacheConfig,
    counters: Counters,
}

impl PermissionCache {
    /// Create a new permission cache
    pub fn new(
        config: CacheConfig,
        shared: Arc<dyn SharedCache>,
        bus: Arc<dyn InvalidationBus>,
    ) -> Self {
        Self {
            local: LocalTier::new(config.l1_capacity, config.l1_ttl),
            shared,
            bus,
            config,
            counters: Counters::default(),
        }
    }

    /// Cache key of a user's permission set
    pub fn key(&self, user_id: UserId) -> String {
        format!("{}{}", self.config.key_prefix, user_id)
    }

    /// Get a user's cached permissions from L1, then L2
    ///
    /// `None` means the caller must resolve and [`put`](Self::put).
    pub async fn get(&self, user_id: UserId) -> Option<Arc<HashSet<String>>> {
        self.lookup(user_id).await.into_permissions()
    }

    /// Like [`get`](Self::get), reporting which tier answered
    pub async fn lookup(&self, user_id: UserId) -> CacheLookup {
        let key = self.key(user_id);

        if let Some(permissions) = self.local.get(&key) {
            Counters::bump(&self.counters.l1_hits);
            return CacheLookup::Local(permissions);
        }

        match self.shared.get(&key).await {
            Ok(Some(payload)) => match serde_json::from_str::<Vec<String>>(&payload) {
                Ok(keys) => {
                    let permissions = Arc::new(keys.into_iter().collect::<HashSet<_>>());
                    self.local.put(key, permissions.clone());
                    Counters::bump(&self.counters.l2_hits);
                    CacheLookup::Shared(permissions)
                }
                Err(e) => {
                    warn!(user_id, error = %e, "Discarding unreadable shared cache entry");
                    Counters::bump(&self.counters.misses);
                    CacheLookup::Miss { degraded: false }
                }
            },
            Ok(None) => {
                Counters::bump(&self.counters.misses);
                CacheLookup::Miss { degraded: false }
            }
            Err(e) => {
                warn!(user_id, error = %e, "Shared cache read failed, falling back");
                Counters::bump(&self.counters.degraded);
                Counters::bump(&self.counters.misses);
                CacheLookup::Miss { degraded: true }
            }
        }
    }

    /// Store a permission set with the configured shared TTL
    pub async fn put(&self, user_id: UserId, permissions: &HashSet<String>) -> Arc<HashSet<String>> {
        self.put_with_ttl(user_id, permissions, self.config.l2_ttl).await
    }

    /// Store a permission set in L2, then L1
    ///
    /// A failed shared write is logged and counted; the local entry is
    /// still written.
    pub async fn put_with_ttl(
        &self,
        user_id: UserId,
        permissions: &HashSet<String>,
        ttl: Duration,
    ) -> Arc<HashSet<String>> {
        let key = self.key(user_id);

        let mut sorted: Vec<&String> = permissions.iter().collect();
        sorted.sort();
        match serde_json::to_string(&sorted) {
            Ok(payload) => {
                if let Err(e) = self.shared.set(&key, &payload, ttl).await {
                    warn!(user_id, error = %e, "Shared cache write failed");
                    Counters::bump(&self.counters.degraded);
                }
            }
            Err(e) => warn!(user_id, error = %e, "Failed to encode permission set"),
        }

        let permissions = Arc::new(permissions.clone());
        self.local.put(key, permissions.clone());
        debug!(user_id, count = permissions.len(), "Cached permissions");
        permissions
    }

    /// Drop a user's entry everywhere and tell the other nodes
    ///
    /// Safe to call repeatedly.
    pub async fn invalidate(&self, user_id: UserId) {
        let key = self.key(user_id);
        self.local.remove(&key);

        if let Err(e) = self.shared.delete(&key).await {
            warn!(user_id, error = %e, "Shared cache delete failed");
            Counters::bump(&self.counters.degraded);
        }

        self.publish(InvalidationMessage::Key(key)).await;
    }

    /// Clear every local entry and every shared permission entry, then ask
    /// all other nodes to clear their local tier
    pub async fn invalidate_all(&self) {
        self.local.clear();

        match self.shared.delete_prefix(&self.config.key_prefix).await {
            Ok(removed) => debug!(removed, "Shared permission entries cleared"),
            Err(e) => {
                warn!(error = %e, "Shared cache prefix delete failed");
                Counters::bump(&self.counters.degraded);
            }
        }

        self.publish(InvalidationMessage::All).await;
    }

    /// Apply a received invalidation message to the local tier
    pub fn apply(&self, message: &InvalidationMessage) {
        Counters::bump(&self.counters.invalidations_received);
        match message {
            InvalidationMessage::Key(key) => {
                self.local.remove(key);
            }
            InvalidationMessage::All => self.local.clear(),
        }
        info!(payload = %message, "Applied cache invalidation");
    }

    /// Subscribe to the bus and apply every message in a background task
    ///
    /// The subscription is live when this returns. The task holds only a
    /// weak reference and stops once the cache is dropped or the bus closes.
    pub async fn spawn_invalidation_listener(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut messages = self.bus.subscribe().await?;
        let cache: Weak<Self> = Arc::downgrade(self);

        Ok(tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                match cache.upgrade() {
                    Some(cache) => cache.apply(&message),
                    None => break,
                }
            }
            debug!("Invalidation listener stopped");
        }))
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStats {
            l1_hits: load(&self.counters.l1_hits),
            l2_hits: load(&self.counters.l2_hits),
            misses: load(&self.counters.misses),
            degraded: load(&self.counters.degraded),
            invalidations_received: load(&self.counters.invalidations_received),
            entries: self.local.len(),
            capacity: self.local.capacity(),
        }
    }

    /// Whether the local tier currently holds an entry for the user
    pub fn is_locally_cached(&self, user_id: UserId) -> bool {
        self.local.get(&self.key(user_id)).is_some()
    }

    async fn publish(&self, message: InvalidationMessage) {
        if let Err(e) = self.bus.publish(&message).await {
            warn!(payload = %message, error = %e, "Invalidation publish failed");
            Counters::bump(&self.counters.degraded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn cache_with(shared: InMemorySharedCache) -> PermissionCache {
        PermissionCache::new(
            CacheConfig::default(),
            Arc::new(shared),
            Arc::new(InMemoryInvalidationBus::default()),
        )
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = cache_with(InMemorySharedCache::new());
        assert!(cache.get(1).await.is_none());

        cache.put(1, &perms(&["user:read"])).await;
        assert!(matches!(cache.lookup(1).await, CacheLookup::Local(_)));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_shared_hit_backfills_local() {
        let shared = InMemorySharedCache::new();
        let writer = cache_with(shared.clone());
        let reader = cache_with(shared);

        writer.put(5, &perms(&["a", "b"])).await;

        match reader.lookup(5).await {
            CacheLookup::Shared(p) => assert_eq!(*p, perms(&["a", "b"])),
            other => panic!("Expected shared hit, got {:?}", other),
        }
        assert!(reader.is_locally_cached(5));
        assert_eq!(reader.stats().l2_hits, 1);
    }

    #[tokio::test]
    async fn test_empty_set_is_cached() {
        let cache = cache_with(InMemorySharedCache::new());
        cache.put(3, &HashSet::new()).await;
        assert_eq!(cache.get(3).await.map(|p| p.len()), Some(0));
    }

    #[tokio::test]
    async fn test_invalidate_twice() {
        let cache = cache_with(InMemorySharedCache::new());
        cache.put(1, &perms(&["x"])).await;

        cache.invalidate(1).await;
        cache.invalidate(1).await;
        assert!(cache.get(1).await.is_none());
    }

    #[tokio::test]
    async fn test_shared_outage_degrades() {
        let shared = InMemorySharedCache::new();
        let cache = cache_with(shared.clone());
        shared.set_available(false);

        assert_eq!(cache.lookup(1).await, CacheLookup::Miss { degraded: true });

        // Write still lands locally
        cache.put(1, &perms(&["x"])).await;
        assert!(cache.get(1).await.is_some());
        assert!(cache.stats().degraded >= 2);
    }

    #[tokio::test]
    async fn test_apply_all_clears_local_only() {
        let shared = InMemorySharedCache::new();
        let cache = cache_with(shared.clone());
        cache.put(1, &perms(&["x"])).await;
        cache.put(2, &perms(&["y"])).await;

        cache.apply(&InvalidationMessage::All);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(shared.len(), 2);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            l1_hits: 2,
            l2_hits: 1,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
