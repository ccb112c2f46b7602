//! A bounded, TTL-expiring key/value store with FIFO-over-insertion-order
//! eviction, used for the bearer token cache and the Hub search/tags
//! passthrough cache.
//!
//! This is deliberately not backed by a generic caching crate: eviction must
//! purge expired entries first and only then fall back to evicting the
//! oldest insertion, and that ordering has to be exact for the capacity
//! invariant to hold after every `set`.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<K, V> {
    map: HashMap<K, Slot<V>>,
    order: VecDeque<K>,
}

pub struct TtlCache<K, V> {
    capacity: usize,
    default_ttl: Duration,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity,
            default_ttl,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let expired = match inner.map.get(key) {
            Some(slot) => slot.expires_at <= now,
            None => return None,
        };
        if expired {
            remove_key(&mut inner, key);
            return None;
        }
        inner.map.get(key).map(|slot| slot.value.clone())
    }

    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut inner = self.inner.lock().unwrap();
        remove_key(&mut inner, &key);

        if inner.map.len() >= self.capacity {
            purge_expired(&mut inner);
        }
        if inner.map.len() >= self.capacity {
            evict_oldest(&mut inner);
        }

        inner.map.insert(
            key.clone(),
            Slot {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        inner.order.push_back(key);
    }

    pub fn delete(&self, key: &K) {
        let mut inner = self.inner.lock().unwrap();
        remove_key(&mut inner, key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn remove_key<K: Eq + Hash + Clone, V>(inner: &mut Inner<K, V>, key: &K) {
    if inner.map.remove(key).is_some() {
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
    }
}

fn purge_expired<K: Eq + Hash + Clone, V>(inner: &mut Inner<K, V>) {
    let now = Instant::now();
    let expired: Vec<K> = inner
        .map
        .iter()
        .filter(|(_, slot)| slot.expires_at <= now)
        .map(|(k, _)| k.clone())
        .collect();
    for key in expired {
        remove_key(inner, &key);
    }
}

fn evict_oldest<K: Eq + Hash + Clone, V>(inner: &mut Inner<K, V>) {
    if let Some(oldest) = inner.order.pop_front() {
        inner.map.remove(&oldest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_miss_then_hit() {
        let c: TtlCache<String, i32> = TtlCache::new(10, Duration::from_secs(60));
        assert_eq!(c.get(&"a".to_string()), None);
        c.set("a".to_string(), 1);
        assert_eq!(c.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn expired_entry_is_evicted_on_get() {
        let c: TtlCache<String, i32> = TtlCache::new(10, Duration::from_millis(1));
        c.set("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(c.get(&"a".to_string()), None);
        assert_eq!(c.size(), 0);
    }

    #[test]
    fn fifo_eviction_when_full_and_not_expired() {
        let c: TtlCache<i32, i32> = TtlCache::new(2, Duration::from_secs(60));
        c.set(1, 1);
        c.set(2, 2);
        c.set(3, 3); // evicts 1
        assert_eq!(c.get(&1), None);
        assert_eq!(c.get(&2), Some(2));
        assert_eq!(c.get(&3), Some(3));
        assert!(c.size() <= 2);
    }

    #[test]
    fn expired_entries_purged_before_fifo_eviction() {
        let c: TtlCache<i32, i32> = TtlCache::new(2, Duration::from_secs(60));
        c.set_with_ttl(1, 1, Duration::from_millis(1));
        c.set(2, 2);
        std::thread::sleep(Duration::from_millis(20));
        // 1 has expired; inserting 3 should purge it rather than evict 2
        c.set(3, 3);
        assert_eq!(c.get(&2), Some(2));
        assert_eq!(c.get(&3), Some(3));
    }

    #[test]
    fn replacing_existing_key_does_not_evict_others() {
        let c: TtlCache<i32, i32> = TtlCache::new(2, Duration::from_secs(60));
        c.set(1, 1);
        c.set(2, 2);
        c.set(1, 10);
        assert_eq!(c.get(&1), Some(10));
        assert_eq!(c.get(&2), Some(2));
        assert_eq!(c.size(), 2);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let c: TtlCache<i32, i32> = TtlCache::new(3, Duration::from_secs(60));
        for i in 0..100 {
            c.set(i, i);
            assert!(c.size() <= 3);
        }
    }

    #[test]
    fn delete_and_clear() {
        let c: TtlCache<i32, i32> = TtlCache::new(3, Duration::from_secs(60));
        c.set(1, 1);
        c.delete(&1);
        assert_eq!(c.get(&1), None);
        c.set(2, 2);
        c.clear();
        assert_eq!(c.size(), 0);
    }
}
