//! ARC: Adaptive Replacement Cache. T1/T2 hold data, B1/B2 are ghost lists
//! (keys only). Grounded in
//! `original_source/src/cache/arc/arc_cache_policy.hpp` and
//! `src/cache/arc_local_cache.c`; the original has TODOs, so the adaptation
//! rule below follows the original ARC paper per spec §4.1/§9.

use std::collections::{HashMap, VecDeque};

use crate::model::{Key, ObjectSize, Value};

use super::{object_bytes, CachePolicy, PolicyError, PolicyResult, PolicyStats, UpdateOutcome};

const METADATA_OVERHEAD_BYTES: u64 = 40;
/// Ghost entries hold keys only; their byte cost is still accounted
/// (spec §4.1: "their byte cost is accounted").
const GHOST_OVERHEAD_BYTES: u64 = 16;

enum LastGhostHit {
    None,
    B1,
    B2,
}

pub struct ArcPolicy {
    capacity_bytes: u64,
    /// Target size for T1, adapted on every ghost hit.
    p: u64,
    t1: VecDeque<Key>,
    t2: VecDeque<Key>,
    b1: VecDeque<Key>,
    b2: VecDeque<Key>,
    data: HashMap<Key, Value>,
    used_bytes: u64,
    ghost_bytes: u64,
    last_ghost_hit: LastGhostHit,
    stats: PolicyStats,
}

impl ArcPolicy {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            p: 0,
            t1: VecDeque::new(),
            t2: VecDeque::new(),
            b1: VecDeque::new(),
            b2: VecDeque::new(),
            data: HashMap::new(),
            used_bytes: 0,
            ghost_bytes: 0,
            last_ghost_hit: LastGhostHit::None,
            stats: PolicyStats::default(),
        }
    }

    fn entry_cost(key: &Key, value: &Value) -> u64 {
        object_bytes(key, value) + METADATA_OVERHEAD_BYTES
    }

    fn remove_from(deque: &mut VecDeque<Key>, key: &Key) -> bool {
        if let Some(pos) = deque.iter().position(|k| k == key) {
            deque.remove(pos);
            true
        } else {
            false
        }
    }

    /// Replacement rule (ARC paper): T1 if `|T1| > p`, or `|T1| == p` and
    /// the triggering ghost hit was in B2, or T2 is empty; else T2.
    fn replace_candidate(&self) -> Option<Key> {
        let t1_over_p = self.t1.len() as u64 > self.p;
        let tie_favors_t1 = self.t1.len() as u64 == self.p && matches!(self.last_ghost_hit, LastGhostHit::B2);
        let from_t1 = (t1_over_p || tie_favors_t1 || self.t2.is_empty()) && !self.t1.is_empty();

        if from_t1 {
            self.t1.front().cloned()
        } else {
            self.t2.front().cloned()
        }
    }

    /// Caps combined ghost-list bytes at `capacity_bytes`, the ARC paper's
    /// `|B1|+|B2| <= c` bound adapted from slot count to byte accounting.
    /// Without this, B1/B2 grow without bound under sustained churn,
    /// keeping `size_for_capacity()` climbing even once T1/T2 are empty.
    fn trim_ghost_lists(&mut self) {
        while self.ghost_bytes > self.capacity_bytes {
            let victim = if self.b1.len() >= self.b2.len() {
                self.b1.pop_front()
            } else {
                self.b2.pop_front()
            };
            if victim.is_none() {
                break;
            }
            self.ghost_bytes = self.ghost_bytes.saturating_sub(GHOST_OVERHEAD_BYTES);
        }
    }
}

impl CachePolicy for ArcPolicy {
    fn exists(&self, key: &Key) -> bool {
        self.data.contains_key(key)
    }

    fn lookup(&mut self, key: &Key) -> Option<Value> {
        if let Some(value) = self.data.get(key).cloned() {
            // Hit in T1 or T2: promote to T2 MRU end.
            if Self::remove_from(&mut self.t1, key) {
                self.t2.push_back(key.clone());
            } else if Self::remove_from(&mut self.t2, key) {
                self.t2.push_back(key.clone());
            }
            self.stats.hits += 1;
            Some(value)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    fn update(&mut self, key: &Key, value: Value) -> PolicyResult<UpdateOutcome> {
        if let Some(existing) = self.data.get_mut(key) {
            let old_cost = Self::entry_cost(key, existing);
            let new_cost = Self::entry_cost(key, &value);
            *existing = value;
            self.used_bytes = self.used_bytes + new_cost - old_cost;
            if Self::remove_from(&mut self.t1, key) {
                self.t2.push_back(key.clone());
            } else {
                Self::remove_from(&mut self.t2, key);
                self.t2.push_back(key.clone());
            }
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

        // Ghost-hit adaptation (spec §4.1 ARC contract), run before
        // inserting so the replacement rule above sees the updated p.
        if Self::remove_from(&mut self.b1, &key) {
            let delta = ((self.b2.len() as f64 / self.b1.len().max(1) as f64).max(1.0)) as u64;
            self.p = (self.p + delta).min(self.capacity_bytes);
            self.ghost_bytes = self.ghost_bytes.saturating_sub(GHOST_OVERHEAD_BYTES);
            self.last_ghost_hit = LastGhostHit::B1;
        } else if Self::remove_from(&mut self.b2, &key) {
            let delta = ((self.b1.len() as f64 / self.b2.len().max(1) as f64).max(1.0)) as u64;
            self.p = self.p.saturating_sub(delta);
            self.ghost_bytes = self.ghost_bytes.saturating_sub(GHOST_OVERHEAD_BYTES);
            self.last_ghost_hit = LastGhostHit::B2;
        } else {
            self.last_ghost_hit = LastGhostHit::None;
        }

        self.data.insert(key.clone(), value);
        self.t1.push_back(key);
        self.used_bytes += cost;
        self.stats.admits += 1;
        Ok(())
    }

    fn get_victim_key(&self) -> Option<Key> {
        self.replace_candidate()
    }

    fn evict_with_given_key(&mut self, key: &Key) -> PolicyResult<Option<Value>> {
        // Only called by the wrapper with a key from get_victim_key; but
        // must work for any resident key (fine-grained contract).
        let from_t1 = Self::remove_from(&mut self.t1, key);
        let from_t2 = !from_t1 && Self::remove_from(&mut self.t2, key);
        if !from_t1 && !from_t2 {
            return Ok(None);
        }

        let value = self.data.remove(key);
        if let Some(ref v) = value {
            let cost = Self::entry_cost(key, v);
            self.used_bytes = self.used_bytes.saturating_sub(cost);
        }

        // Move to the matching ghost list.
        if from_t1 {
            self.b1.push_back(key.clone());
        } else {
            self.b2.push_back(key.clone());
        }
        self.ghost_bytes += GHOST_OVERHEAD_BYTES;
        self.trim_ghost_lists();
        self.stats.evictions += 1;
        Ok(value)
    }

    fn evict_no_given_key(&mut self, _required_bytes: u64) -> PolicyResult<Vec<(Key, Value)>> {
        Err(PolicyError::CoarseGrainedOnly)
    }

    fn has_fine_grained_management(&self) -> bool {
        true
    }

    fn size_for_capacity(&self) -> u64 {
        self.used_bytes + self.ghost_bytes
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
    fn ghost_hit_on_b1_shifts_p_upward_and_prefers_t2_on_replace() {
        let mut p = ArcPolicy::new(10_000);
        // Fill T1 so an eviction goes there.
        for i in 0..5 {
            p.admit(Key::from_str(&format!("k{i}")), Value::new(vec![0u8; 10])).unwrap();
        }
        let victim = p.get_victim_key().unwrap();
        p.evict_with_given_key(&victim).unwrap();
        assert!(p.b1.contains(&victim));

        let p_before = p.p;
        // Re-admitting the evicted key is a ghost hit in B1.
        p.admit(victim.clone(), Value::new(vec![0u8; 10])).unwrap();
        assert!(p.p >= p_before);
        assert!(matches!(p.last_ghost_hit, LastGhostHit::B1));
    }

    #[test]
    fn admit_then_evict_then_exists_is_false() {
        let mut p = ArcPolicy::new(1000);
        p.admit(Key::from_str("k"), Value::from("v")).unwrap();
        assert_eq!(p.evict_with_given_key(&Key::from_str("k")).unwrap(), Some(Value::from("v")));
        assert!(!p.exists(&Key::from_str("k")));
    }

    #[test]
    fn ghost_lists_stay_bounded_under_sustained_churn() {
        let mut p = ArcPolicy::new(1_000);
        for i in 0..500 {
            let key = Key::from_str(&format!("k{i}"));
            p.admit(key.clone(), Value::new(vec![0u8; 10])).unwrap();
            while p.size_for_capacity() > p.capacity_bytes() {
                let Some(victim) = p.get_victim_key() else { break };
                p.evict_with_given_key(&victim).unwrap();
            }
        }
        assert!(p.ghost_bytes <= p.capacity_bytes);
    }
}
