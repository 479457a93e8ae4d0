//! Bounded LRU cache of per-caller server instances
//!
//! Only an optimization: a miss builds a fresh value, so nothing observable
//! depends on whether an entry is present.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use parking_lot::Mutex;

#[derive(Debug)]
pub struct LruCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    max_entries: usize,
}

#[derive(Debug)]
struct CacheState<K, V> {
    entries: HashMap<K, V>,
    lru: VecDeque<K>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                lru: VecDeque::new(),
            }),
            max_entries: max_entries.max(1),
        }
    }

    /// Cached value for `key`, or the one built by `make`
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        let mut state = self.state.lock();
        if let Some(value) = state.entries.get(&key).cloned() {
            state.touch_key(&key);
            return value;
        }

        let value = make();
        state.insert(key, value.clone(), self.max_entries);
        value
    }
}

impl<K: Eq + Hash + Clone, V> CacheState<K, V> {
    fn touch_key(&mut self, key: &K) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key.clone());
    }

    fn insert(&mut self, key: K, value: V, max_entries: usize) {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch_key(&key);
        } else {
            self.lru.push_back(key);
        }

        while self.entries.len() > max_entries {
            let Some(evict) = self.lru.pop_front() else {
                break;
            };
            self.entries.remove(&evict);
        }
    }
}
