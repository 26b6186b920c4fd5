//! Per-controller result cache.
//!
//! Simulations are deterministic, so a repeated request may reuse the
//! previous result. The cache is owned by one controller and bounded;
//! nothing here is ever process-global.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

/// Bounded LRU keyed by the canonical request encoding.
#[derive(Debug)]
pub struct ResultCache<V> {
    capacity: usize,
    map: HashMap<u64, V>,
    order: VecDeque<u64>,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(capacity: usize) -> Self {
        ResultCache {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn key_for(canonical: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        hasher.finish()
    }

    pub fn get(&mut self, key: u64) -> Option<V> {
        let value = self.map.get(&key).cloned()?;
        self.touch(key);
        Some(value)
    }

    pub fn insert(&mut self, key: u64, value: V) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(key, value).is_none() {
            self.order.push_back(key);
        } else {
            self.touch(key);
        }
        while self.map.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }

    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
            self.order.push_back(key);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ResultCache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        assert_eq!(cache.get(1), Some("a")); // 1 is now most recent
        cache.insert(3, "c");
        assert_eq!(cache.get(2), None);
        assert_eq!(cache.get(1), Some("a"));
        assert_eq!(cache.get(3), Some("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let mut cache = ResultCache::new(0);
        cache.insert(1, "a");
        assert!(cache.is_empty());
    }

    #[test]
    fn same_canonical_text_same_key() {
        assert_eq!(
            ResultCache::<()>::key_for("abc"),
            ResultCache::<()>::key_for("abc")
        );
        assert_ne!(
            ResultCache::<()>::key_for("abc"),
            ResultCache::<()>::key_for("abd")
        );
    }
}
