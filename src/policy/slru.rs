//! SLRU: segmented LRU with a probationary and a protected segment;
//! promotion on second access. Rejects objects too large for one segment
//! (spec §4.1 `canAdmit`). Grounded in
//! `original_source/src/cache/slru/slru_cache_policy.hpp` and
//! `src/cache/slru_local_cache.c`.

use std::collections::{HashMap, VecDeque};

use crate::model::{Key, ObjectSize, Value};

use super::{object_bytes, CachePolicy, PolicyError, PolicyResult, PolicyStats, UpdateOutcome};

const METADATA_OVERHEAD_BYTES: u64 = 40;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Segment {
    Probationary,
    Protected,
}

struct SlotEntry {
    value: Value,
    segment: Segment,
}

pub struct SlruPolicy {
    capacity_bytes: u64,
    protected_capacity_bytes: u64,
    used_bytes: u64,
    protected_used_bytes: u64,
    probationary_order: VecDeque<Key>,
    protected_order: VecDeque<Key>,
    entries: HashMap<Key, SlotEntry>,
    stats: PolicyStats,
}

impl SlruPolicy {
    pub fn new(capacity_bytes: u64) -> Self {
        Self::with_protected_ratio(capacity_bytes, 0.8)
    }

    pub fn with_protected_ratio(capacity_bytes: u64, protected_ratio: f64) -> Self {
        Self {
            capacity_bytes,
            protected_capacity_bytes: (capacity_bytes as f64 * protected_ratio) as u64,
            used_bytes: 0,
            protected_used_bytes: 0,
            probationary_order: VecDeque::new(),
            protected_order: VecDeque::new(),
            entries: HashMap::new(),
            stats: PolicyStats::default(),
        }
    }

    fn entry_cost(key: &Key, value: &Value) -> u64 {
        object_bytes(key, value) + METADATA_OVERHEAD_BYTES
    }

    fn promote(&mut self, key: &Key) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.segment == Segment::Protected {
            if let Some(pos) = self.protected_order.iter().position(|k| k == key) {
                let k = self.protected_order.remove(pos).unwrap();
                self.protected_order.push_back(k);
            }
            return;
        }

        // Move probationary -> protected; demote protected's LRU victim
        // back to probationary if that would overflow the protected
        // segment's own byte budget (per-segment accounting, spec 4.1:
        // "must fit one LRU segment").
        let cost = Self::entry_cost(key, &self.entries[key].value);
        if let Some(pos) = self.probationary_order.iter().position(|k| k == key) {
            self.probationary_order.remove(pos);
        }

        while self.protected_used_bytes + cost > self.protected_capacity_bytes {
            let Some(demoted_key) = self.protected_order.pop_front() else {
                break;
            };
            if let Some(demoted) = self.entries.get_mut(&demoted_key) {
                demoted.segment = Segment::Probationary;
                let demoted_cost = Self::entry_cost(&demoted_key, &demoted.value);
                self.protected_used_bytes = self.protected_used_bytes.saturating_sub(demoted_cost);
                self.probationary_order.push_back(demoted_key);
            }
        }

        self.entries.get_mut(key).unwrap().segment = Segment::Protected;
        self.protected_used_bytes += cost;
        self.protected_order.push_back(key.clone());
    }
}

impl CachePolicy for SlruPolicy {
    fn exists(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    fn lookup(&mut self, key: &Key) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            let value = entry.value.clone();
            self.promote(key);
            self.stats.hits += 1;
            Some(value)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    fn update(&mut self, key: &Key, value: Value) -> PolicyResult<UpdateOutcome> {
        if let Some(entry) = self.entries.get_mut(key) {
            let old_cost = Self::entry_cost(key, &entry.value);
            let new_cost = Self::entry_cost(key, &value);
            if entry.segment == Segment::Protected {
                self.protected_used_bytes = self.protected_used_bytes + new_cost - old_cost;
            }
            entry.value = value;
            self.used_bytes = self.used_bytes + new_cost - old_cost;
            self.promote(key);
            Ok(UpdateOutcome::Hit)
        } else {
            Ok(UpdateOutcome::Miss)
        }
    }

    fn need_independent_admit(&mut self, _key: &Key, _value: &Value) -> bool {
        true
    }

    fn admit(&mut self, key: Key, value: Value) -> PolicyResult<()> {
        if !self.can_admit(value.len()) {
            return Err(PolicyError::InvalidObjectSize(value.len()));
        }
        let cost = Self::entry_cost(&key, &value);
        if !self.entries.contains_key(&key) {
            self.probationary_order.push_back(key.clone());
        }
        self.entries.insert(
            key,
            SlotEntry {
                value,
                segment: Segment::Probationary,
            },
        );
        self.used_bytes += cost;
        self.stats.admits += 1;
        Ok(())
    }

    fn get_victim_key(&self) -> Option<Key> {
        self.probationary_order
            .front()
            .cloned()
            .or_else(|| self.protected_order.front().cloned())
    }

    fn evict_with_given_key(&mut self, key: &Key) -> PolicyResult<Option<Value>> {
        if let Some(entry) = self.entries.remove(key) {
            let cost = Self::entry_cost(key, &entry.value);
            self.used_bytes = self.used_bytes.saturating_sub(cost);
            if entry.segment == Segment::Protected {
                self.protected_used_bytes = self.protected_used_bytes.saturating_sub(cost);
                self.protected_order.retain(|k| k != key);
            } else {
                self.probationary_order.retain(|k| k != key);
            }
            self.stats.evictions += 1;
            Ok(Some(entry.value))
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
        let probationary_capacity = self.capacity_bytes - self.protected_capacity_bytes;
        (object_size as u64 + METADATA_OVERHEAD_BYTES) < probationary_capacity
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
    fn second_access_promotes_to_protected_segment() {
        let mut p = SlruPolicy::new(1000);
        p.admit(Key::from_str("hot"), Value::from("v")).unwrap();
        p.lookup(&Key::from_str("hot"));
        assert!(p.protected_order.contains(&Key::from_str("hot")));
    }

    #[test]
    fn oversized_object_is_rejected() {
        let mut p = SlruPolicy::new(100);
        let result = p.admit(Key::from_str("big"), Value::new(vec![0u8; 200]));
        assert!(result.is_err());
    }
}
