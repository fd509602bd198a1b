//! Certificate Cache
//!
//! LRU cache mapping requested name → issued certificate. Eviction is
//! capacity-driven; an optional maximum entry age turns stale hits into
//! misses. Counters live in [`super::stats`] so a purge never resets them.

use crate::mitm::issued::IssuedCertificate;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default capacity when none (or zero) is configured
pub const DEFAULT_CACHE_SIZE: usize = 10_000;

struct CacheEntry {
    cert: Arc<IssuedCertificate>,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_older_than(&self, max_age: Duration) -> bool {
        self.cached_at.elapsed() > max_age
    }
}

/// Certificate cache with LRU eviction policy
pub struct CertCache {
    cache: LruCache<String, CacheEntry>,
    max_age: Option<Duration>,
}

impl CertCache {
    /// Create a new certificate cache with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self::with_max_age(capacity, None)
    }

    /// Create a cache whose entries are dropped once older than `max_age`
    pub fn with_max_age(capacity: usize, max_age: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(NonZeroUsize::MIN.saturating_add(DEFAULT_CACHE_SIZE - 1));
        Self {
            cache: LruCache::new(capacity),
            max_age,
        }
    }

    /// Look up `name`, promoting it to most-recently-used
    pub fn get(&mut self, name: &str) -> Option<Arc<IssuedCertificate>> {
        if let Some(max_age) = self.max_age {
            if self.cache.peek(name).is_some_and(|e| e.is_older_than(max_age)) {
                self.cache.pop(name);
                return None;
            }
        }
        self.cache.get(name).map(|entry| Arc::clone(&entry.cert))
    }

    /// Insert a certificate, evicting the coldest entry when full.
    /// Returns the evicted name, if any.
    pub fn insert(&mut self, name: String, cert: Arc<IssuedCertificate>) -> Option<String> {
        let entry = CacheEntry {
            cert,
            cached_at: Instant::now(),
        };
        match self.cache.push(name, entry) {
            // push() also returns the old value on key replacement
            Some((evicted, _)) if !self.cache.contains(&evicted) => Some(evicted),
            _ => None,
        }
    }

    /// Drop a single entry
    pub fn remove(&mut self, name: &str) -> bool {
        self.cache.pop(name).is_some()
    }

    /// Get the number of certificates in the cache
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Get the cache capacity
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
