//! Bounded LRU cache for query results, keyed by the normalized query plus
//! the result-shaping inputs (top_k, threshold). Invalidated wholesale on
//! any index mutation.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use unicode_normalization::UnicodeNormalization;

use crate::types::SearchResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    top_k: usize,
    /// f32 bit pattern so the key is hashable; 0.0 when unset.
    threshold_bits: u32,
}

/// NFC + trim + lowercase.
pub fn normalize_query(query: &str) -> String {
    query.nfc().collect::<String>().trim().to_lowercase()
}

pub struct QueryCache {
    inner: Mutex<LruCache<CacheKey, Arc<Vec<SearchResult>>>>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
        }
    }

    fn key(query: &str, top_k: usize, threshold: Option<f32>) -> CacheKey {
        CacheKey {
            query: normalize_query(query),
            top_k,
            threshold_bits: threshold.unwrap_or(0.0).to_bits(),
        }
    }

    pub fn get(
        &self,
        query: &str,
        top_k: usize,
        threshold: Option<f32>,
    ) -> Option<Arc<Vec<SearchResult>>> {
        self.inner
            .lock()
            .get(&Self::key(query, top_k, threshold))
            .cloned()
    }

    pub fn put(
        &self,
        query: &str,
        top_k: usize,
        threshold: Option<f32>,
        results: Arc<Vec<SearchResult>>,
    ) {
        self.inner
            .lock()
            .put(Self::key(query, top_k, threshold), results);
    }

    /// Wholesale invalidation, called after any commit, delete or rebuild.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(content: &str) -> Arc<Vec<SearchResult>> {
        Arc::new(vec![SearchResult {
            content: content.into(),
            path: "a.md".into(),
            page: None,
            score: 1.0,
            rerank_score: None,
            chunk_id: 1,
        }])
    }

    #[test]
    fn hit_requires_same_key() {
        let cache = QueryCache::new(10);
        cache.put("rust", 5, None, result("x"));

        assert!(cache.get("rust", 5, None).is_some());
        assert!(cache.get("rust", 6, None).is_none());
        assert!(cache.get("rust", 5, Some(0.5)).is_none());
    }

    #[test]
    fn normalization_unifies_case_and_whitespace() {
        let cache = QueryCache::new(10);
        cache.put("  Rust Ownership ", 5, None, result("x"));
        assert!(cache.get("rust ownership", 5, None).is_some());
    }

    #[test]
    fn capacity_evicts_lru() {
        let cache = QueryCache::new(2);
        cache.put("a", 1, None, result("a"));
        cache.put("b", 1, None, result("b"));
        // touch a so b is the LRU entry
        let _ = cache.get("a", 1, None);
        cache.put("c", 1, None, result("c"));

        assert!(cache.get("a", 1, None).is_some());
        assert!(cache.get("b", 1, None).is_none());
        assert!(cache.get("c", 1, None).is_some());
    }

    #[test]
    fn clear_empties_everything() {
        let cache = QueryCache::new(10);
        cache.put("a", 1, None, result("a"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a", 1, None).is_none());
    }
}
