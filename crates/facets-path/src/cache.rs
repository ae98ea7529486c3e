#![forbid(unsafe_code)]

//! Bounded cache of compiled patterns keyed by their trimmed text.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::parser::{SyntaxError, parse};
use crate::syntax::SyntaxTree;

/// Hit/miss counters for a [`PatternCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

/// LRU cache of parsed patterns.
///
/// Trees are shared through [`Arc`], so handing one out never copies the
/// arena. Failed parses are not cached.
#[derive(Debug)]
pub struct PatternCache {
    entries: LruCache<String, Arc<SyntaxTree>>,
    hits: u64,
    misses: u64,
}

impl PatternCache {
    /// Create a cache holding at most `capacity` patterns (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Return the cached tree for `pattern`, parsing it on a miss.
    ///
    /// # Errors
    ///
    /// Propagates the [`SyntaxError`] of a failed parse.
    pub fn get_or_parse(&mut self, pattern: &str) -> Result<Arc<SyntaxTree>, SyntaxError> {
        let key = pattern.trim();
        if let Some(tree) = self.entries.get(key) {
            self.hits += 1;
            return Ok(Arc::clone(tree));
        }
        self.misses += 1;
        let tree = Arc::new(parse(key)?);
        self.entries.put(key.to_string(), Arc::clone(&tree));
        Ok(tree)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.entries.len(),
            capacity: self.capacity(),
        }
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_returns_shared_tree() {
        let mut cache = PatternCache::new(4);
        let first = cache.get_or_parse("a.b").unwrap();
        let second = cache.get_or_parse("  a.b ").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.len), (1, 1, 1));
    }

    #[test]
    fn errors_are_not_cached() {
        let mut cache = PatternCache::new(4);
        assert!(cache.get_or_parse("a b").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let mut cache = PatternCache::new(2);
        cache.get_or_parse("a").unwrap();
        cache.get_or_parse("b").unwrap();
        cache.get_or_parse("a").unwrap();
        cache.get_or_parse("c").unwrap();
        assert_eq!(cache.len(), 2);
        cache.get_or_parse("a").unwrap();
        assert_eq!(cache.stats().hits, 2);
        cache.get_or_parse("b").unwrap();
        assert_eq!(cache.stats().misses, 4);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(PatternCache::new(0).capacity(), 1);
    }
}
