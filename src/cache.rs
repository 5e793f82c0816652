//! Bounded memoization cache with chained invalidation.
//!
//! - Keys are ordered lists of string parts (owner, method, arguments)
//! - Bounded caches evict the least recently used key
//! - Invalidating a part drops every key containing it and is forwarded to
//!   chained caches, so a directory listing cache can take the directory
//!   thumbnails built from it down with it

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Cache key made of string parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a part to the key.
    pub fn part(mut self, part: impl fmt::Display) -> Self {
        self.0.push(part.to_string());
        self
    }

    /// Whether `part` is one of the key's parts.
    pub fn contains(&self, part: &str) -> bool {
        self.0.iter().any(|p| p == part)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

/// Anything that can drop entries matching a key part.
///
/// Implemented by every `Cache<V>` so caches holding different value types
/// can be chained together.
pub trait Invalidate: Send + Sync {
    fn invalidate(&self, part: &str);
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hits, {} misses, {} entries",
            self.hits, self.misses, self.entries
        )
    }
}

struct CacheInner<V> {
    entries: LruCache<CacheKey, V>,
    hits: u64,
    misses: u64,
}

/// Thread-safe memoization cache.
pub struct Cache<V> {
    name: &'static str,
    limit: Option<usize>,
    shared: bool,
    inner: Mutex<CacheInner<V>>,
    chained: Mutex<Vec<Arc<dyn Invalidate>>>,
}

impl<V: Clone + Send + 'static> Cache<V> {
    /// Create a cache whose keys are scoped to the owning instance.
    pub fn new(name: &'static str, limit: Option<usize>) -> Self {
        Self::build(name, limit, false)
    }

    /// Create a cache shared by every instance: the owner is left out of
    /// the key, so equal arguments give equal results.
    pub fn shared(name: &'static str, limit: Option<usize>) -> Self {
        Self::build(name, limit, true)
    }

    fn build(name: &'static str, limit: Option<usize>, shared: bool) -> Self {
        let entries = match limit {
            Some(limit) => LruCache::new(NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN)),
            None => LruCache::unbounded(),
        };

        debug!(cache = name, ?limit, shared, "Initialized cache");

        Self {
            name,
            limit,
            shared,
            inner: Mutex::new(CacheInner {
                entries,
                hits: 0,
                misses: 0,
            }),
            chained: Mutex::new(Vec::new()),
        }
    }

    /// Wrap the cache in an `Arc` and register it as chained to `top`.
    pub fn chained_to<U: Clone + Send + 'static>(self, top: &Cache<U>) -> Arc<Self> {
        let cache = Arc::new(self);
        top.add_chained(cache.clone());
        cache
    }

    /// Register a cache that is invalidated together with this one.
    pub fn add_chained(&self, chained: Arc<dyn Invalidate>) {
        self.chained.lock().push(chained);
    }

    /// Build a key for `method` called on `owner`.
    ///
    /// The owner is only part of the key for unshared caches.
    pub fn key(&self, owner: impl fmt::Display, method: &str) -> CacheKey {
        let key = CacheKey::new();
        let key = if self.shared { key } else { key.part(owner) };
        key.part(method)
    }

    /// Look up a value, refreshing its recency on hit.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.entries.get(key).cloned();
        if value.is_some() {
            inner.hits += 1;
            trace!(cache = self.name, %key, "Found in the cache");
        } else {
            inner.misses += 1;
        }
        value
    }

    /// Store a value, evicting the least recently used key when full.
    pub fn insert(&self, key: CacheKey, value: V) {
        let mut inner = self.inner.lock();
        if let Some((evicted, _)) = inner.entries.push(key.clone(), value) {
            if evicted != key {
                trace!(cache = self.name, key = %evicted, "Evicted from the cache");
            }
        }
    }

    /// Return the cached value for `key` or compute and store it.
    ///
    /// Errors are returned to the caller and never cached. The computation
    /// runs without holding the cache lock.
    pub fn get_or_try_insert_with<F>(&self, key: CacheKey, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let start = Instant::now();
        let value = compute()?;
        trace!(
            cache = self.name,
            %key,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Not found in the cache, value computed"
        );
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Infallible variant of [`Cache::get_or_try_insert_with`].
    pub fn get_or_insert_with<F>(&self, key: CacheKey, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute();
        self.insert(key, value.clone());
        value
    }

    #[cfg(test)]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
        }
    }
}

impl<V: Clone + Send + 'static> Invalidate for Cache<V> {
    fn invalidate(&self, part: &str) {
        {
            let mut inner = self.inner.lock();
            let matches: Vec<CacheKey> = inner
                .entries
                .iter()
                .filter(|(key, _)| key.contains(part))
                .map(|(key, _)| key.clone())
                .collect();

            for key in matches {
                trace!(cache = self.name, %key, "Invalidating");
                inner.entries.pop(&key);
            }
        }

        let chained = self.chained.lock().clone();
        for cache in chained {
            cache.invalidate(part);
        }
    }
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("shared", &self.shared)
            .finish()
    }
}
