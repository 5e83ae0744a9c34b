//! Insertion-ordered caches.
//!
//! All engine caches evict by insertion order, not by access recency: a hit
//! never moves an entry later in the eviction queue. Each cache picks how
//! many entries leave at once through [`EvictionPolicy`]:
//!
//! - line chunks and spectra: [`EvictionPolicy::Oldest`]
//! - band planes: [`EvictionPolicy::OldestBatch`], amortizing the check over
//!   a fraction of the capacity

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// How many entries are evicted once a cache exceeds its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Drop the single oldest entry.
    Oldest,
    /// Drop this many oldest entries in one go (at least one).
    OldestBatch(usize),
}

/// A bounded map that remembers insertion order.
#[derive(Debug, Clone)]
pub struct FifoCache<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
    policy: EvictionPolicy,
}

impl<K: Eq + Hash + Clone, V> FifoCache<K, V> {
    /// Create an empty cache.
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            policy,
        }
    }

    /// Look up an entry without touching its eviction position.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Whether `key` is resident.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert an entry and evict if over capacity.
    ///
    /// Replacing an existing key keeps its original position. Returns the
    /// evicted keys, oldest first.
    pub fn insert(&mut self, key: K, value: V) -> Vec<K> {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }

        if self.entries.len() <= self.capacity {
            return Vec::new();
        }

        let count = match self.policy {
            EvictionPolicy::Oldest => 1,
            EvictionPolicy::OldestBatch(n) => n.max(1),
        };
        let mut evicted = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resident keys, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_inserted() {
        let mut cache = FifoCache::new(2, EvictionPolicy::Oldest);
        assert!(cache.insert(0, "a").is_empty());
        assert!(cache.insert(1, "b").is_empty());
        assert_eq!(cache.insert(2, "c"), vec![0]);
        assert_eq!(cache.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_hits_do_not_refresh_position() {
        let mut cache = FifoCache::new(2, EvictionPolicy::Oldest);
        cache.insert("x", 1);
        cache.insert("y", 2);
        assert_eq!(cache.get(&"x"), Some(&1));
        // "x" is still the oldest despite the hit
        assert_eq!(cache.insert("z", 3), vec!["x"]);
        assert!(!cache.contains_key(&"x"));
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut cache = FifoCache::new(2, EvictionPolicy::Oldest);
        cache.insert(1, 'a');
        cache.insert(2, 'b');
        assert!(cache.insert(1, 'c').is_empty());
        assert_eq!(cache.get(&1), Some(&'c'));
        assert_eq!(cache.insert(3, 'd'), vec![1]);
    }

    #[test]
    fn test_batch_eviction() {
        let mut cache = FifoCache::new(10, EvictionPolicy::OldestBatch(2));
        for i in 0..10 {
            assert!(cache.insert(i, i).is_empty());
        }
        assert_eq!(cache.insert(10, 10), vec![0, 1]);
        assert_eq!(cache.len(), 9);
        assert_eq!(cache.keys().next(), Some(&2));
    }

    #[test]
    fn test_zero_batch_still_evicts_one() {
        let mut cache = FifoCache::new(1, EvictionPolicy::OldestBatch(0));
        cache.insert(1, ());
        assert_eq!(cache.insert(2, ()), vec![1]);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_clear() {
        let mut cache = FifoCache::new(3, EvictionPolicy::Oldest);
        cache.insert(1, 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.keys().count(), 0);
    }
}
