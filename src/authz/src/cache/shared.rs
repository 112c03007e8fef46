//! Shared (cross-process) key/value tier
//!
//! Used both as the L2 permission tier and as the home of session epochs.
//! Adapters report an unreachable backend as [`AuthzError::CacheDegraded`];
//! callers decide how to fall back.

use crate::error::{AuthzError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared key/value cache with per-entry TTL
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Get a live value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value that expires after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key starting with `prefix`, returning how many went
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process shared tier
///
/// Clones share storage, so several cache instances in one test process can
/// stand in for nodes sharing one Redis. [`set_available`] simulates an
/// outage.
///
/// [`set_available`]: InMemorySharedCache::set_available
#[derive(Debug, Clone)]
pub struct InMemorySharedCache {
    entries: Arc<DashMap<String, Entry>>,
    available: Arc<AtomicBool>,
}

impl InMemorySharedCache {
    /// Create a new empty shared cache
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggle simulated reachability
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AuthzError::CacheDegraded(
                "in-memory shared cache marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for InMemorySharedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available()?;

        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }

        // Expired - remove
        self.entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.ensure_available()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.ensure_available()?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
