//! LRU: least-recently-used eviction, promoting on every `lookup`.
//! Grounded in `original_source/src/cache/*` FIFO/SLRU siblings (no
//! dedicated `lru_local_cache.c` file in the original; LRU is the base
//! case SLRU degenerates to with a single segment) and
//! `other_examples/.../sigsegved-cache-rs__src-lib.rs`'s `LruCache`.

use std::collections::{HashMap, VecDeque};

use crate::model::{Key, ObjectSize, Value};

use super::{object_bytes, CachePolicy, PolicyError, PolicyResult, PolicyStats, UpdateOutcome};

const METADATA_OVERHEAD_BYTES: u64 = 32;

pub struct LruPolicy {
    capacity_bytes: u64,
    used_bytes: u64,
    /// Front = least recently used, back = most recently used.
    order: VecDeque<Key>,
    entries: HashMap<Key, Value>,
    stats: PolicyStats,
}

impl LruPolicy {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            used_bytes: 0,
            order: VecDeque::new(),
            entries: HashMap::new(),
            stats: PolicyStats::default(),
        }
    }

    fn entry_cost(key: &Key, value: &Value) -> u64 {
        object_bytes(key, value) + METADATA_OVERHEAD_BYTES
    }

    fn touch(&mut self, key: &Key) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
    }
}

impl CachePolicy for LruPolicy {
    fn exists(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    fn lookup(&mut self, key: &Key) -> Option<Value> {
        if let Some(value) = self.entries.get(key).cloned() {
            self.touch(key);
            self.stats.hits += 1;
            Some(value)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    fn update(&mut self, key: &Key, value: Value) -> PolicyResult<UpdateOutcome> {
        if let Some(existing) = self.entries.get_mut(key) {
            let old_cost = Self::entry_cost(key, existing);
            let new_cost = Self::entry_cost(key, &value);
            *existing = value;
            self.used_bytes = self.used_bytes + new_cost - old_cost;
            self.touch(key);
            Ok(UpdateOutcome::Hit)
        } else {
            Ok(UpdateOutcome::Miss)
        }
    }

    fn need_independent_admit(&mut self, _key: &Key, _value: &Value) -> bool {
        true
    }

    fn admit(&mut self, key: Key, value: Value) -> PolicyResult<()> {
        let cost = Self::entry_cost(&key, &value);
        if !self.entries.contains_key(&key) {
            self.order.push_back(key.clone());
        } else {
            self.touch(&key);
        }
        self.entries.insert(key, value);
        self.used_bytes += cost;
        self.stats.admits += 1;
        Ok(())
    }

    fn get_victim_key(&self) -> Option<Key> {
        self.order.front().cloned()
    }

    fn evict_with_given_key(&mut self, key: &Key) -> PolicyResult<Option<Value>> {
        if let Some(value) = self.entries.remove(key) {
            let cost = Self::entry_cost(key, &value);
            self.used_bytes = self.used_bytes.saturating_sub(cost);
            self.order.retain(|k| k != key);
            self.stats.evictions += 1;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    fn evict_no_given_key(&mut self, _required_bytes: u64) -> PolicyResult<Vec<(Key, Value)>> {
        Err(PolicyError::CoarseGrainedOnly)
    }

    fn has_fine_grained_management(&self) -> bool {
        true
    }

    fn size_for_capacity(&self) -> u64 {
        self.used_bytes
    }

    fn can_admit(&self, object_size: ObjectSize) -> bool {
        (object_size as u64) < self.capacity_bytes
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    fn stats(&self) -> PolicyStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_driven_eviction_picks_least_recently_used() {
        // Scenario from spec §8: capacity 100B, admit a(50B), b(40B), c(50B).
        let mut p = LruPolicy::new(100);
        p.admit(Key::from_str("a"), Value::new(vec![0u8; 50 - METADATA_OVERHEAD_BYTES as usize]))
            .unwrap();
        p.admit(Key::from_str("b"), Value::new(vec![0u8; 40 - METADATA_OVERHEAD_BYTES as usize]))
            .unwrap();
        // Free bytes for c by evicting until it fits, as the wrapper would.
        let need = object_bytes(&Key::from_str("c"), &Value::new(vec![0u8; 50 - METADATA_OVERHEAD_BYTES as usize]))
            + METADATA_OVERHEAD_BYTES;
        while p.size_for_capacity() + need > p.capacity_bytes() {
            let victim = p.get_victim_key().unwrap();
            p.evict_with_given_key(&victim).unwrap();
        }
        p.admit(Key::from_str("c"), Value::new(vec![0u8; 50 - METADATA_OVERHEAD_BYTES as usize]))
            .unwrap();

        assert!(!p.exists(&Key::from_str("a")));
        assert!(p.exists(&Key::from_str("b")));
        assert!(p.exists(&Key::from_str("c")));
    }

    #[test]
    fn lookup_promotes_key_to_most_recently_used() {
        let mut p = LruPolicy::new(1000);
        p.admit(Key::from_str("a"), Value::from("1")).unwrap();
        p.admit(Key::from_str("b"), Value::from("2")).unwrap();
        p.lookup(&Key::from_str("a"));
        assert_eq!(p.get_victim_key(), Some(Key::from_str("b")));
    }
}
