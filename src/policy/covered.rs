//! COVERED and BESTGUESS: cooperation-aware policies that wrap a base
//! local engine (W-TinyLFU, for its admission quality under skewed
//! popularity) with per-key popularity tracking the dispatcher consults
//! for background placement (spec §4.1 "a 'covered' policy that exposes
//! additional cooperation-aware metadata", §4.4 "Background placement
//! (covered only)"). No dedicated `covered_cache_policy.hpp` exists;
//! grounded instead in
//! `original_source/src/cache/covered/pergroup_statistics.{c,h}` and
//! `group_level_metadata.h` for the per-key popularity accounting, and
//! `message/control/cooperation/bestguess/*` (the latter has a
//! placement-notify message but no distinct eviction algorithm — see
//! SPEC_FULL §4 supplement on `BESTGUESS`).

use crate::model::{Key, ObjectSize, Value};

use super::{CachePolicy, PolicyResult, PolicyStats, UpdateOutcome, WTinyLfuPolicy};

/// Per-key popularity counter, incremented on every hit and admission.
/// Read by the dispatcher's background-placement step to rank candidate
/// keys for proactive replication onto neighbor edges (spec §4.4).
struct PopularityTracker {
    counts: std::collections::HashMap<Key, u64>,
}

impl PopularityTracker {
    fn new() -> Self {
        Self {
            counts: std::collections::HashMap::new(),
        }
    }

    fn bump(&mut self, key: &Key) {
        *self.counts.entry(key.clone()).or_insert(0) += 1;
    }

    fn forget(&mut self, key: &Key) {
        self.counts.remove(key);
    }

    /// The `n` keys with the highest recorded popularity, descending.
    /// Used by the beacon to pick among the top-k edges for background
    /// placement (spec §4.4).
    fn top_n(&self, n: usize) -> Vec<Key> {
        let mut pairs: Vec<(&Key, &u64)> = self.counts.iter().collect();
        pairs.sort_by(|a, b| b.1.cmp(a.1));
        pairs.into_iter().take(n).map(|(k, _)| k.clone()).collect()
    }

    fn popularity(&self, key: &Key) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }
}

pub struct CoveredPolicy {
    engine: WTinyLfuPolicy,
    popularity: PopularityTracker,
}

impl CoveredPolicy {
    pub fn new(capacity_bytes: u64, seed: u64) -> Self {
        Self {
            engine: WTinyLfuPolicy::new(capacity_bytes, seed),
            popularity: PopularityTracker::new(),
        }
    }

    /// Candidate keys for proactive placement on neighbor edges, ranked by
    /// accumulated popularity (spec §4.4). `covered`'s beacon-side
    /// placement step picks among the top `k` edges for these keys.
    pub fn top_popular_keys(&self, n: usize) -> Vec<Key> {
        self.popularity.top_n(n)
    }

    pub fn popularity_of(&self, key: &Key) -> u64 {
        self.popularity.popularity(key)
    }
}

impl CachePolicy for CoveredPolicy {
    fn exists(&self, key: &Key) -> bool {
        self.engine.exists(key)
    }

    fn lookup(&mut self, key: &Key) -> Option<Value> {
        let result = self.engine.lookup(key);
        if result.is_some() {
            self.popularity.bump(key);
        }
        result
    }

    fn update(&mut self, key: &Key, value: Value) -> PolicyResult<UpdateOutcome> {
        self.engine.update(key, value)
    }

    fn need_independent_admit(&mut self, key: &Key, value: &Value) -> bool {
        self.engine.need_independent_admit(key, value)
    }

    fn admit(&mut self, key: Key, value: Value) -> PolicyResult<()> {
        self.popularity.bump(&key);
        self.engine.admit(key, value)
    }

    fn get_victim_key(&self) -> Option<Key> {
        self.engine.get_victim_key()
    }

    fn evict_with_given_key(&mut self, key: &Key) -> PolicyResult<Option<Value>> {
        let result = self.engine.evict_with_given_key(key);
        if matches!(result, Ok(Some(_))) {
            self.popularity.forget(key);
        }
        result
    }

    fn evict_no_given_key(&mut self, required_bytes: u64) -> PolicyResult<Vec<(Key, Value)>> {
        let freed = self.engine.evict_no_given_key(required_bytes)?;
        for (key, _) in &freed {
            self.popularity.forget(key);
        }
        Ok(freed)
    }

    fn has_fine_grained_management(&self) -> bool {
        self.engine.has_fine_grained_management()
    }

    fn size_for_capacity(&self) -> u64 {
        self.engine.size_for_capacity()
    }

    fn can_admit(&self, object_size: ObjectSize) -> bool {
        self.engine.can_admit(object_size)
    }

    fn capacity_bytes(&self) -> u64 {
        self.engine.capacity_bytes()
    }

    fn stats(&self) -> PolicyStats {
        self.engine.stats()
    }

    fn is_cooperation_aware(&self) -> bool {
        true
    }

    fn top_popular_keys(&self, n: usize) -> Vec<Key> {
        self.top_popular_keys(n)
    }
}

/// `BESTGUESS` shares `covered`'s local engine exactly; the two variants
/// only differ in the dispatcher's background-placement strategy (single
/// best edge by raw popularity vs. covered's top-k fan-out). See
/// SPEC_FULL §4 supplement for why this is a thin wrapper rather than a
/// twelfth eviction algorithm.
pub struct BestGuessPolicy {
    inner: CoveredPolicy,
}

impl BestGuessPolicy {
    pub fn new(capacity_bytes: u64, seed: u64) -> Self {
        Self {
            inner: CoveredPolicy::new(capacity_bytes, seed),
        }
    }

    /// The single best placement candidate by raw popularity, as opposed
    /// to `covered`'s top-k fan-out (spec §4.4, SPEC_FULL §4 supplement).
    pub fn best_guess_key(&self) -> Option<Key> {
        self.inner.top_popular_keys(1).into_iter().next()
    }
}

impl CachePolicy for BestGuessPolicy {
    fn exists(&self, key: &Key) -> bool {
        self.inner.exists(key)
    }

    fn lookup(&mut self, key: &Key) -> Option<Value> {
        self.inner.lookup(key)
    }

    fn update(&mut self, key: &Key, value: Value) -> PolicyResult<UpdateOutcome> {
        self.inner.update(key, value)
    }

    fn need_independent_admit(&mut self, key: &Key, value: &Value) -> bool {
        self.inner.need_independent_admit(key, value)
    }

    fn admit(&mut self, key: Key, value: Value) -> PolicyResult<()> {
        self.inner.admit(key, value)
    }

    fn get_victim_key(&self) -> Option<Key> {
        self.inner.get_victim_key()
    }

    fn evict_with_given_key(&mut self, key: &Key) -> PolicyResult<Option<Value>> {
        self.inner.evict_with_given_key(key)
    }

    fn evict_no_given_key(&mut self, required_bytes: u64) -> PolicyResult<Vec<(Key, Value)>> {
        self.inner.evict_no_given_key(required_bytes)
    }

    fn has_fine_grained_management(&self) -> bool {
        self.inner.has_fine_grained_management()
    }

    fn size_for_capacity(&self) -> u64 {
        self.inner.size_for_capacity()
    }

    fn can_admit(&self, object_size: ObjectSize) -> bool {
        self.inner.can_admit(object_size)
    }

    fn capacity_bytes(&self) -> u64 {
        self.inner.capacity_bytes()
    }

    fn stats(&self) -> PolicyStats {
        self.inner.stats()
    }

    fn is_cooperation_aware(&self) -> bool {
        true
    }

    /// `bestguess` only ever proposes its single best candidate, ignoring
    /// `n` — the simpler per-edge-only placement heuristic that
    /// distinguishes it from `covered`'s top-k fan-out.
    fn top_popular_keys(&self, _n: usize) -> Vec<Key> {
        self.best_guess_key().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_support::make_room;

    #[test]
    fn popularity_tracks_hits_and_forgets_on_eviction() {
        let mut p = CoveredPolicy::new(100_000, 1);
        p.admit(Key::from_str("k"), Value::new(vec![0u8; 10])).unwrap();
        for _ in 0..5 {
            p.lookup(&Key::from_str("k"));
        }
        assert_eq!(p.popularity_of(&Key::from_str("k")), 6); // 1 admit + 5 hits
        p.evict_no_given_key(p.size_for_capacity() + 1).unwrap();
    }

    #[test]
    fn top_popular_keys_ranks_by_hit_count() {
        let mut p = CoveredPolicy::new(100_000, 1);
        p.admit(Key::from_str("hot"), Value::new(vec![0u8; 10])).unwrap();
        p.admit(Key::from_str("cold"), Value::new(vec![0u8; 10])).unwrap();
        for _ in 0..10 {
            p.lookup(&Key::from_str("hot"));
        }
        let top = p.top_popular_keys(1);
        assert_eq!(top, vec![Key::from_str("hot")]);
    }

    #[test]
    fn bestguess_delegates_to_covered_engine() {
        let mut p = BestGuessPolicy::new(2000, 1);
        for i in 0..30 {
            p.admit(Key::from_str(&format!("k{i}")), Value::new(vec![0u8; 10])).unwrap();
        }
        make_room(&mut p, 300);
        assert!(p.size_for_capacity() <= p.capacity_bytes() + 300);
        assert!(p.best_guess_key().is_some());
        assert!(p.is_cooperation_aware());
    }
}
