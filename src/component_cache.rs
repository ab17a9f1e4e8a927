//! Bounded recency-ordered cache of compiled components, keyed by the raw
//! source text they were built from.

use std::num::NonZeroUsize;

use lru::LruCache;

pub struct ComponentCache<V> {
    entries: LruCache<String, V>,
}

impl<V> ComponentCache<V> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(non_zero(capacity)),
        }
    }

    /// Look up and mark as most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or replace, evicting the least recently used entry when full.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if let Some((evicted, _)) = self.entries.push(key.clone(), value) {
            if evicted != key {
                tracing::debug!(target = "oracle", "component cache evicted least recently used entry");
            }
        }
    }

    /// Membership test that leaves recency untouched.
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Change capacity; shrinking evicts least recently used entries.
    pub fn resize(&mut self, capacity: usize) {
        self.entries.resize(non_zero(capacity));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}
