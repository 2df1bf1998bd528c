//! FIFO: first-in-first-out eviction. Grounded in
//! `original_source/src/cache/fifo_local_cache.c` and
//! `src/cache/fifo/fifo_cache_policy.hpp`.

use std::collections::{HashMap, VecDeque};

use crate::model::{Key, ObjectSize, Value};

use super::{object_bytes, CachePolicy, PolicyError, PolicyResult, PolicyStats, UpdateOutcome};

/// Per-entry overhead: one queue-slot key clone + one hashmap slot.
const METADATA_OVERHEAD_BYTES: u64 = 32;

pub struct FifoPolicy {
    capacity_bytes: u64,
    used_bytes: u64,
    order: VecDeque<Key>,
    entries: HashMap<Key, Value>,
    stats: PolicyStats,
}

impl FifoPolicy {
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
}

impl CachePolicy for FifoPolicy {
    fn exists(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    fn lookup(&mut self, key: &Key) -> Option<Value> {
        if let Some(value) = self.entries.get(key).cloned() {
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
    use crate::policy::test_support::make_room;

    #[test]
    fn evicts_in_admission_order() {
        let mut p = FifoPolicy::new(1000);
        p.admit(Key::from_str("a"), Value::from("1")).unwrap();
        p.admit(Key::from_str("b"), Value::from("2")).unwrap();
        p.admit(Key::from_str("c"), Value::from("3")).unwrap();

        assert_eq!(p.get_victim_key(), Some(Key::from_str("a")));
        p.evict_with_given_key(&Key::from_str("a")).unwrap();
        assert_eq!(p.get_victim_key(), Some(Key::from_str("b")));
    }

    #[test]
    fn admit_then_get_returns_value_immediately() {
        let mut p = FifoPolicy::new(1000);
        p.admit(Key::from_str("k"), Value::from("v")).unwrap();
        assert_eq!(p.lookup(&Key::from_str("k")), Some(Value::from("v")));
    }

    #[test]
    fn admit_then_evict_with_given_key_removes_and_exists_is_false() {
        let mut p = FifoPolicy::new(1000);
        p.admit(Key::from_str("k"), Value::from("v")).unwrap();
        assert_eq!(p.evict_with_given_key(&Key::from_str("k")).unwrap(), Some(Value::from("v")));
        assert!(!p.exists(&Key::from_str("k")));
    }

    #[test]
    fn capacity_never_exceeded_after_make_room() {
        let mut p = FifoPolicy::new(100);
        p.admit(Key::from_str("a"), Value::new(vec![0u8; 50])).unwrap();
        p.admit(Key::from_str("b"), Value::new(vec![0u8; 40])).unwrap();
        make_room(&mut p, 50);
        p.admit(Key::from_str("c"), Value::new(vec![0u8; 50])).unwrap();
        assert!(p.size_for_capacity() <= p.capacity_bytes());
        assert!(!p.exists(&Key::from_str("a")));
    }
}
