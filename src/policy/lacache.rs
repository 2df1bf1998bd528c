//! LA-Cache: latency-aware admission and eviction. Ranks each resident
//! object by the expected miss-latency savings per byte it buys,
//! `f = LT(LT+1) / ((LT+2)*size)` with `LT = λ(miss_latency + size*1000/BW)`,
//! estimating each key's arrival rate `λ` from a ring of its last 20
//! inter-arrival times. Only admits on a key's non-first access (it must
//! have missed once before to have an arrival-rate estimate worth acting
//! on). Victim is the minimum rank of a uniform sample of 100 resident
//! objects (spec §4.1 "LA-Cache"). Grounded in
//! `original_source/src/cache/lacache/lacache.{c,h}`.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{Key, ObjectSize, Value};

use super::{object_bytes, CachePolicy, PolicyError, PolicyResult, PolicyStats, UpdateOutcome};

const METADATA_OVERHEAD_BYTES: u64 = 56;
const ARRIVAL_RING_LEN: usize = 20;
const SAMPLE_SIZE: usize = 100;
/// Simulated network bandwidth to origin, bytes/sec, used in `LT`'s
/// transfer-time term `size*1000/BW` (spec §4.1 gives the formula but not
/// the constant; picked as a representative WAN link and documented here
/// as the chosen value, spec §9).
const BANDWIDTH_BYTES_PER_SEC: f64 = 125_000_000.0; // 1 Gbps
/// Miss latency assumed for objects without a measured one (spec §4.1's
/// `use2` gate checks `miss_latency <= 1s`; we use a representative
/// cross-edge RTT so `use2` is true by default).
const DEFAULT_MISS_LATENCY_S: f64 = 0.05;

struct ArrivalStats {
    /// Ring of the last `ARRIVAL_RING_LEN` inter-arrival gaps, in ticks.
    ring: Vec<f64>,
    ring_pos: usize,
    last_seen_tick: u64,
    observations: u64,
    miss_latency_s: f64,
}

impl ArrivalStats {
    fn new(tick: u64) -> Self {
        Self {
            ring: Vec::with_capacity(ARRIVAL_RING_LEN),
            ring_pos: 0,
            last_seen_tick: tick,
            observations: 1,
            miss_latency_s: DEFAULT_MISS_LATENCY_S,
        }
    }

    fn record_arrival(&mut self, tick: u64) {
        let gap = tick.saturating_sub(self.last_seen_tick).max(1) as f64;
        if self.ring.len() < ARRIVAL_RING_LEN {
            self.ring.push(gap);
        } else {
            self.ring[self.ring_pos] = gap;
        }
        self.ring_pos = (self.ring_pos + 1) % ARRIVAL_RING_LEN;
        self.last_seen_tick = tick;
        self.observations += 1;
    }

    fn mean_interarrival(&self) -> f64 {
        if self.ring.is_empty() {
            1.0
        } else {
            self.ring.iter().sum::<f64>() / self.ring.len() as f64
        }
    }

    /// `λ = 1 / mean(interarrival)`, with the `use2` substitution from
    /// spec §4.1: if `miss_latency <= 1s` and the elapsed time since last
    /// access exceeds `12/λ`, use `λ = 1/elapsed` instead (the object has
    /// gone quiet longer than its own estimate predicts).
    fn lambda(&self, now_tick: u64) -> f64 {
        let base_lambda = 1.0 / self.mean_interarrival().max(1e-9);
        let use2 = self.miss_latency_s <= 1.0;
        if use2 {
            let elapsed = now_tick.saturating_sub(self.last_seen_tick).max(1) as f64;
            if elapsed > 12.0 / base_lambda.max(1e-9) {
                return 1.0 / elapsed;
            }
        }
        base_lambda
    }
}

fn rank(lambda: f64, miss_latency_s: f64, size: u64) -> f64 {
    let size_f = size.max(1) as f64;
    let lt = lambda * (miss_latency_s + size_f * 1000.0 / BANDWIDTH_BYTES_PER_SEC);
    lt * (lt + 1.0) / ((lt + 2.0) * size_f)
}

struct SlotEntry {
    value: Value,
}

pub struct LaCachePolicy {
    capacity_bytes: u64,
    used_bytes: u64,
    entries: HashMap<Key, SlotEntry>,
    resident_order: Vec<Key>,
    arrivals: HashMap<Key, ArrivalStats>,
    tick: u64,
    seed: u64,
    stats: PolicyStats,
}

impl LaCachePolicy {
    pub fn new(capacity_bytes: u64, seed: u64) -> Self {
        Self {
            capacity_bytes,
            used_bytes: 0,
            entries: HashMap::new(),
            resident_order: Vec::new(),
            arrivals: HashMap::new(),
            tick: 0,
            seed,
            stats: PolicyStats::default(),
        }
    }

    fn entry_cost(key: &Key, value: &Value) -> u64 {
        object_bytes(key, value) + METADATA_OVERHEAD_BYTES
    }

    fn compact_resident_order(&mut self) {
        if self.resident_order.len() > self.entries.len() * 2 + 16 {
            self.resident_order.retain(|k| self.entries.contains_key(k));
        }
    }

    fn touch_arrival(&mut self, key: &Key) {
        self.tick += 1;
        let tick = self.tick;
        self.arrivals
            .entry(key.clone())
            .and_modify(|a| a.record_arrival(tick))
            .or_insert_with(|| ArrivalStats::new(tick));
    }
}

impl CachePolicy for LaCachePolicy {
    fn exists(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    fn lookup(&mut self, key: &Key) -> Option<Value> {
        self.touch_arrival(key);
        if let Some(entry) = self.entries.get(key) {
            self.stats.hits += 1;
            Some(entry.value.clone())
        } else {
            self.stats.misses += 1;
            None
        }
    }

    fn update(&mut self, key: &Key, value: Value) -> PolicyResult<UpdateOutcome> {
        if let Some(entry) = self.entries.get_mut(key) {
            let old_cost = Self::entry_cost(key, &entry.value);
            let new_cost = Self::entry_cost(key, &value);
            entry.value = value;
            self.used_bytes = self.used_bytes + new_cost - old_cost;
            Ok(UpdateOutcome::Hit)
        } else {
            Ok(UpdateOutcome::Miss)
        }
    }

    /// Admission only on a key's non-first access: a key with no arrival
    /// history, or exactly one observation, has not yet proven it will be
    /// asked for again (spec §4.1: "only on non-first access").
    fn need_independent_admit(&mut self, key: &Key, _value: &Value) -> bool {
        self.touch_arrival(key);
        self.arrivals.get(key).map(|a| a.observations >= 2).unwrap_or(false)
    }

    fn admit(&mut self, key: Key, value: Value) -> PolicyResult<()> {
        let cost = Self::entry_cost(&key, &value);
        if !self.entries.contains_key(&key) {
            self.resident_order.push(key.clone());
        }
        self.entries.insert(key, SlotEntry { value });
        self.used_bytes += cost;
        self.stats.admits += 1;
        self.compact_resident_order();
        Ok(())
    }

    fn get_victim_key(&self) -> Option<Key> {
        // Immutable per the trait; sampling here re-derives StdRng state
        // deterministically from a throwaway clone seeded by the tick, the
        // same approach `LhdPolicy::get_victim_key` uses.
        if self.entries.is_empty() {
            return None;
        }
        let n = self.resident_order.len();
        if n == 0 {
            return None;
        }
        let mut scratch_rng =
            StdRng::seed_from_u64(self.seed ^ self.tick ^ 0xA5A5_5A5A_1234_5678);
        let mut best: Option<(Key, f64)> = None;
        let mut seen = std::collections::HashSet::new();
        let mut attempts = 0;
        while seen.len() < SAMPLE_SIZE.min(self.entries.len()) && attempts < SAMPLE_SIZE * 8 {
            let idx = scratch_rng.gen_range(0..n);
            attempts += 1;
            let key = &self.resident_order[idx];
            let Some(entry) = self.entries.get(key) else { continue };
            if !seen.insert(key.clone()) {
                continue;
            }
            let size = entry.value.len() as u64;
            let (lambda, miss_latency_s) = match self.arrivals.get(key) {
                Some(a) => (a.lambda(self.tick), a.miss_latency_s),
                None => (1.0 / ARRIVAL_RING_LEN as f64, DEFAULT_MISS_LATENCY_S),
            };
            let r = rank(lambda, miss_latency_s, size);
            if best.as_ref().map(|(_, best_r)| r < *best_r).unwrap_or(true) {
                best = Some((key.clone(), r));
            }
        }
        best.map(|(k, _)| k)
    }

    fn evict_with_given_key(&mut self, key: &Key) -> PolicyResult<Option<Value>> {
        if let Some(entry) = self.entries.remove(key) {
            let cost = Self::entry_cost(key, &entry.value);
            self.used_bytes = self.used_bytes.saturating_sub(cost);
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
        (object_size as u64) < self.capacity_bytes
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    fn stats(&self) -> PolicyStats {
        self.stats
    }
}
