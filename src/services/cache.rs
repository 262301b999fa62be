use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::types::SearchResponse;

struct Entry {
    inserted: Instant,
    value: SearchResponse,
}

/// Bounded LRU of catalog search results with a per-entry TTL.
///
/// Any write touching catalog content or availability must call
/// [`CatalogCache::invalidate`]; entries are not tracked per book.
#[derive(Clone)]
pub struct CatalogCache {
    inner: Arc<Mutex<LruCache<String, Entry>>>,
    ttl: Duration,
}

impl CatalogCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner: Arc::new(Mutex::new(LruCache::new(capacity))), ttl }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        // Un panic pendant un put ne laisse pas le cache incohérent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<SearchResponse> {
        let mut cache = self.lock();
        let fresh = match cache.get(key) {
            Some(entry) => entry.inserted.elapsed() < self.ttl,
            None => return None,
        };
        if !fresh {
            cache.pop(key);
            return None;
        }
        cache.get(key).map(|e| e.value.clone())
    }

    pub fn put(&self, key: String, value: SearchResponse) {
        self.lock().put(key, Entry { inserted: Instant::now(), value });
    }

    pub fn invalidate(&self) {
        let mut cache = self.lock();
        if !cache.is_empty() {
            tracing::debug!(entries = cache.len(), "Catalog cache invalidated");
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
