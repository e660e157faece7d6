//! Fixed-capacity LRU cache shared between request workers.
//!
//! One mutex guards the whole cache, so promotion and eviction happen as a
//! single step for every operation. Values are cloned out; store `Arc`s for
//! anything expensive to copy.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

pub struct BoundedCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a copy of the value and marks the key most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    /// Inserts or replaces `key`, marking it most recently used. When the
    /// cache is full and `key` is new, the least recently used entry is
    /// dropped first.
    pub fn put(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    /// Check-and-insert in one step.
    ///
    /// If `key` is present and `keep` accepts its value, the entry is promoted
    /// and a copy of it is returned. Otherwise `value` is stored and `None`
    /// is returned.
    pub fn put_unless<F>(&self, key: K, value: V, keep: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        let mut cache = self.inner.lock();
        if let Some(existing) = cache.get(&key) {
            if keep(existing) {
                return Some(existing.clone());
            }
        }
        cache.put(key, value);
        None
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key)
    }

    /// Removes `key` only if `pred` accepts its current value.
    pub fn remove_if<F>(&self, key: &K, pred: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        let mut cache = self.inner.lock();
        if cache.peek(key).is_some_and(pred) {
            return cache.pop(key);
        }
        None
    }

    /// Membership test that leaves recency untouched.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.inner.lock().cap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    fn cache(capacity: usize) -> BoundedCache<&'static str, u32> {
        BoundedCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn get_promotes_before_eviction() {
        let cache = cache(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("c", 3);

        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"a"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn contains_does_not_promote() {
        let cache = cache(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert!(cache.contains(&"a"));
        cache.put("c", 3);
        assert!(!cache.contains(&"a"));
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let cache = cache(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn put_unless_keeps_accepted_entry() {
        let cache = cache(4);
        assert_eq!(cache.put_unless("job", 1, |_| true), None);
        assert_eq!(cache.put_unless("job", 2, |v| *v == 1), Some(1));
        assert_eq!(cache.get(&"job"), Some(1));

        assert_eq!(cache.put_unless("job", 3, |v| *v == 2), None);
        assert_eq!(cache.get(&"job"), Some(3));
    }

    #[test]
    fn remove_if_checks_the_current_value() {
        let cache = cache(4);
        cache.put("job", 1);
        assert_eq!(cache.remove_if(&"job", |v| *v == 2), None);
        assert!(cache.contains(&"job"));
        assert_eq!(cache.remove_if(&"job", |v| *v == 1), Some(1));
        assert!(cache.is_empty());
        assert_eq!(cache.remove_if(&"missing", |_| true), None);
    }

    #[test]
    fn concurrent_put_unless_admits_one_writer() {
        let cache = Arc::new(BoundedCache::<u32, usize>::new(NonZeroUsize::new(8).unwrap()));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.put_unless(7, worker, |_| true).is_none())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8),
        Get(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0u8..12).prop_map(Op::Put), (0u8..12).prop_map(Op::Get)]
    }

    proptest! {
        #[test]
        fn holds_the_most_recently_touched_keys(capacity in 1usize..6, ops in prop::collection::vec(op(), 0..64)) {
            let cache = BoundedCache::<u8, u8>::new(NonZeroUsize::new(capacity).unwrap());
            // Most recent at the back.
            let mut model: VecDeque<u8> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Put(k) => {
                        cache.put(k, k);
                        model.retain(|x| *x != k);
                        model.push_back(k);
                        if model.len() > capacity {
                            model.pop_front();
                        }
                    }
                    Op::Get(k) => {
                        let hit = cache.get(&k);
                        prop_assert_eq!(hit.is_some(), model.contains(&k));
                        if hit.is_some() {
                            model.retain(|x| *x != k);
                            model.push_back(k);
                        }
                    }
                }
                prop_assert!(cache.len() <= capacity);
            }

            prop_assert_eq!(cache.len(), model.len());
            for k in &model {
                prop_assert!(cache.contains(k));
            }
        }
    }
}
