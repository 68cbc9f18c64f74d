//! Bounded LRU cache used for the parsed-unit and static-props caches (spec
//! C2: "caches for parsed units and static props keyed by id with bounded
//! size (LRU, >= 1000 entries)").

use std::collections::HashMap;
use std::hash::Hash;

pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: Vec<K>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.map.contains_key(key) {
            self.touch(key);
        }
        self.map.get(key)
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.map.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push(key);
        if self.order.len() > self.capacity {
            let evicted = self.order.remove(0);
            self.map.remove(&evicted);
        }
    }

    pub fn remove(&mut self, key: &K) {
        self.map.remove(key);
        self.order.retain(|k| k != key);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache: LruCache<u32, &'static str> = LruCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.get(&1); // touch 1, so 2 becomes the LRU entry
        cache.put(3, "c");
        assert!(cache.get(&2).is_none());
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&3).is_some());
    }

    #[test]
    fn respects_capacity_bound() {
        let mut cache: LruCache<u32, u32> = LruCache::new(1000);
        for i in 0..2000u32 {
            cache.put(i, i);
        }
        assert_eq!(cache.len(), 1000);
    }
}
