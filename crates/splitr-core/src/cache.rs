//! Bounded idempotency cache.
//!
//! Maps a correlation id to the response already produced for it, so a
//! redelivered request is answered by replay instead of re-running its
//! handler. Access-ordered LRU: `get` and `put` mark an entry as most recently
//! used, `contains` does not.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::envelope::{CorrelationId, ResponseEnvelope};

/// Capacity used when none is configured.
pub const DEFAULT_CAPACITY: usize = 100;

/// Shared LRU of produced responses.
///
/// Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct IdempotencyCache {
    entries: Arc<Mutex<LruCache<CorrelationId, ResponseEnvelope>>>,
}

impl IdempotencyCache {
    /// Creates a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Returns `true` if a response is cached for `id`. Does not affect recency.
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.lock().contains(id)
    }

    /// Returns the cached response for `id` and marks it most recently used.
    pub fn get(&self, id: &CorrelationId) -> Option<ResponseEnvelope> {
        self.entries.lock().get(id).cloned()
    }

    /// Stores `response` under `id`, evicting the least recently used entry when full.
    pub fn put(&self, id: CorrelationId, response: ResponseEnvelope) {
        self.entries.lock().put(id, response);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for IdempotencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("IdempotencyCache")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(cache: &IdempotencyCache, id: &str) {
        cache.put(id.into(), ResponseEnvelope::ok(id.into(), id));
    }

    #[test]
    fn test_put_and_get() {
        let cache = IdempotencyCache::new(2);
        put(&cache, "a");
        assert!(cache.contains(&"a".into()));
        assert_eq!(cache.get(&"a".into()).unwrap().id().as_str(), "a");
        assert!(cache.get(&"b".into()).is_none());
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let cache = IdempotencyCache::new(3);
        for i in 0..10 {
            put(&cache, &i.to_string());
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_touched_entry_survives_eviction() {
        let cache = IdempotencyCache::new(3);
        put(&cache, "a");
        put(&cache, "b");
        put(&cache, "c");

        // Touch the oldest entry, then overflow.
        assert!(cache.get(&"a".into()).is_some());
        put(&cache, "d");

        assert!(cache.contains(&"a".into()));
        assert!(!cache.contains(&"b".into()));
        assert!(cache.contains(&"c".into()));
        assert!(cache.contains(&"d".into()));
    }

    #[test]
    fn test_contains_does_not_refresh() {
        let cache = IdempotencyCache::new(2);
        put(&cache, "a");
        put(&cache, "b");
        assert!(cache.contains(&"a".into()));
        put(&cache, "c");
        assert!(!cache.contains(&"a".into()));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = IdempotencyCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }
}
