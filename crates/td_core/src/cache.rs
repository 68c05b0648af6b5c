//! Short-window result cache.
//!
//! Entries are valid for `window_ms` after insertion. Stale entries are
//! dropped lazily when looked up and in bulk by [`TimedCache::sweep`],
//! which the simulation runs from its maintenance step.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Hit/miss counters for a cache.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entries, including ones not yet swept.
    pub entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing fresh.
    pub misses: u64,
}

impl CacheStats {
    /// `hits / (hits + misses)`, 0 before the first lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Map whose entries expire `window_ms` after insertion.
#[derive(Debug, Clone)]
pub struct TimedCache<K, V> {
    window_ms: u64,
    entries: HashMap<K, (u64, V)>,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash, V: Clone> TimedCache<K, V> {
    /// Create an empty cache.
    #[must_use]
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Validity window.
    #[must_use]
    pub const fn window_ms(&self) -> u64 {
        self.window_ms
    }

    fn is_fresh(&self, inserted_at: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(inserted_at) < self.window_ms
    }

    /// Fresh value for `key`; a stale entry is removed on the way.
    pub fn get(&mut self, key: &K, now_ms: u64) -> Option<V> {
        let fresh = match self.entries.get(key) {
            Some(&(inserted_at, _)) => self.is_fresh(inserted_at, now_ms),
            None => {
                self.misses += 1;
                return None;
            }
        };
        if !fresh {
            self.entries.remove(key);
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.entries.get(key).map(|(_, value)| value.clone())
    }

    /// Store a value stamped with `now_ms`.
    pub fn insert(&mut self, key: K, value: V, now_ms: u64) {
        self.entries.insert(key, (now_ms, value));
    }

    /// Drop one entry.
    pub fn invalidate(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop every stale entry, returning how many were removed.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        let window = self.window_ms;
        self.entries
            .retain(|_, &mut (inserted_at, _)| now_ms.saturating_sub(inserted_at) < window);
        before - self.entries.len()
    }

    /// Drop everything and zero the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Number of stored entries, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_entries_hit() {
        let mut cache = TimedCache::new(50);
        cache.insert(1u64, "tower", 100);
        assert_eq!(cache.get(&1, 149), Some("tower"));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_stale_entries_invalidated_lazily() {
        let mut cache = TimedCache::new(50);
        cache.insert(1u64, 7u32, 100);
        assert_eq!(cache.get(&1, 150), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_sweep_purges_only_stale() {
        let mut cache = TimedCache::new(50);
        cache.insert(1u64, 1u32, 0);
        cache.insert(2u64, 2u32, 40);
        assert_eq!(cache.sweep(60), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&2, 60), Some(2));
    }

    #[test]
    fn test_hit_rate() {
        let mut cache = TimedCache::new(10);
        cache.insert(1u64, (), 0);
        cache.get(&1, 1);
        cache.get(&2, 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < 1e-9);

        cache.clear();
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
