//! W-TinyLFU: a small admission-window LRU feeding a segmented (SLRU) main
//! cache, gated by a count-min frequency sketch with periodic halving.
//! Coarse-grained: admitting a window candidate into main requires
//! comparing it against main's probationary victim, so eviction proceeds by
//! requested byte budget rather than a single given key (spec §4.1
//! `evictNoGivenKey`). Grounded in `original_source/src/cache/wtinylfu/`
//! (the original's `CountMinSketch` uses 4 hash rows over a fixed-width
//! counter array with periodic aging, reproduced here).

use std::collections::{HashMap, VecDeque};

use crate::model::{Key, ObjectSize, Value};

use super::{object_bytes, CachePolicy, PolicyError, PolicyResult, PolicyStats, UpdateOutcome};

const METADATA_OVERHEAD_BYTES: u64 = 48;
const WINDOW_RATIO: f64 = 0.01;
const PROTECTED_RATIO: f64 = 0.8;
const SKETCH_ROWS: usize = 4;
const SKETCH_WIDTH: usize = 256;
const MAX_COUNTER: u8 = 15;

struct CountMinSketch {
    rows: [Vec<u8>; SKETCH_ROWS],
    seeds: [u64; SKETCH_ROWS],
    additions: u64,
    halve_every: u64,
}

impl CountMinSketch {
    fn new(seed: u64, halve_every: u64) -> Self {
        let seeds = [
            seed ^ 0x9E37_79B9_7F4A_7C15,
            seed.wrapping_mul(0xBF58_476D_1CE4_E5B9) ^ 1,
            seed.wrapping_mul(0x94D0_49BB_1331_11EB) ^ 2,
            seed.rotate_left(17) ^ 3,
        ];
        Self {
            rows: std::array::from_fn(|_| vec![0u8; SKETCH_WIDTH]),
            seeds,
            additions: 0,
            halve_every: halve_every.max(1),
        }
    }

    fn slot(&self, row: usize, key: &Key) -> usize {
        let h = key.stable_hash() ^ self.seeds[row];
        (h as usize) % SKETCH_WIDTH
    }

    fn estimate(&self, key: &Key) -> u8 {
        (0..SKETCH_ROWS).map(|r| self.rows[r][self.slot(r, key)]).min().unwrap_or(0)
    }

    fn record(&mut self, key: &Key) {
        for r in 0..SKETCH_ROWS {
            let idx = self.slot(r, key);
            if self.rows[r][idx] < MAX_COUNTER {
                self.rows[r][idx] += 1;
            }
        }
        self.additions += 1;
        if self.additions >= self.halve_every {
            for row in &mut self.rows {
                for c in row.iter_mut() {
                    *c /= 2;
                }
            }
            self.additions = 0;
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Region {
    Window,
    Probationary,
    Protected,
}

struct SlotEntry {
    value: Value,
    region: Region,
}

pub struct WTinyLfuPolicy {
    capacity_bytes: u64,
    window_capacity_bytes: u64,
    protected_capacity_bytes: u64,
    window_used_bytes: u64,
    main_used_bytes: u64,
    protected_used_bytes: u64,
    window: VecDeque<Key>,
    probationary: VecDeque<Key>,
    protected: VecDeque<Key>,
    entries: HashMap<Key, SlotEntry>,
    sketch: CountMinSketch,
    stats: PolicyStats,
}

impl WTinyLfuPolicy {
    pub fn new(capacity_bytes: u64, seed: u64) -> Self {
        let window_capacity_bytes = (capacity_bytes as f64 * WINDOW_RATIO) as u64;
        let main_capacity_bytes = capacity_bytes - window_capacity_bytes;
        Self {
            capacity_bytes,
            window_capacity_bytes,
            protected_capacity_bytes: (main_capacity_bytes as f64 * PROTECTED_RATIO) as u64,
            window_used_bytes: 0,
            main_used_bytes: 0,
            protected_used_bytes: 0,
            window: VecDeque::new(),
            probationary: VecDeque::new(),
            protected: VecDeque::new(),
            entries: HashMap::new(),
            sketch: CountMinSketch::new(seed, (capacity_bytes / 8).max(1024)),
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

    fn promote_to_protected(&mut self, key: &Key) {
        let Some(entry) = self.entries.get(key) else { return };
        if entry.region != Region::Probationary {
            return;
        }
        let cost = Self::entry_cost(key, &entry.value);
        Self::remove_from(&mut self.probationary, key);

        while self.protected_used_bytes + cost > self.protected_capacity_bytes {
            let Some(demoted) = self.protected.pop_front() else { break };
            if let Some(e) = self.entries.get_mut(&demoted) {
                e.region = Region::Probationary;
                let c = Self::entry_cost(&demoted, &e.value);
                self.protected_used_bytes = self.protected_used_bytes.saturating_sub(c);
                self.probationary.push_back(demoted);
            }
        }

        self.entries.get_mut(key).unwrap().region = Region::Protected;
        self.protected_used_bytes += cost;
        self.protected.push_back(key.clone());
    }

    /// Pops the window's LRU candidate and admits it to main only if it
    /// wins the frequency comparison against main's probationary victim
    /// (classic TinyLFU admission). Returns the loser, if any, as freed.
    fn drain_one_window_candidate(&mut self) -> Option<(Key, Value)> {
        let candidate_key = self.window.pop_front()?;
        let Some(candidate_entry) = self.entries.remove(&candidate_key) else {
            return None;
        };
        let cost = Self::entry_cost(&candidate_key, &candidate_entry.value);
        self.window_used_bytes = self.window_used_bytes.saturating_sub(cost);

        let Some(victim_key) = self.probationary.front().cloned() else {
            // Main is empty: candidate is admitted unconditionally.
            self.probationary.push_back(candidate_key.clone());
            self.main_used_bytes += cost;
            self.entries.insert(
                candidate_key,
                SlotEntry {
                    value: candidate_entry.value,
                    region: Region::Probationary,
                },
            );
            return None;
        };

        let candidate_freq = self.sketch.estimate(&candidate_key);
        let victim_freq = self.sketch.estimate(&victim_key);

        if candidate_freq > victim_freq {
            let victim_entry = self.entries.remove(&victim_key).unwrap();
            self.probationary.pop_front();
            let victim_cost = Self::entry_cost(&victim_key, &victim_entry.value);
            self.main_used_bytes = self.main_used_bytes.saturating_sub(victim_cost);

            self.probationary.push_back(candidate_key.clone());
            self.main_used_bytes += cost;
            self.entries.insert(
                candidate_key,
                SlotEntry {
                    value: candidate_entry.value,
                    region: Region::Probationary,
                },
            );
            self.stats.evictions += 1;
            Some((victim_key, victim_entry.value))
        } else {
            self.stats.evictions += 1;
            Some((candidate_key, candidate_entry.value))
        }
    }
}

impl CachePolicy for WTinyLfuPolicy {
    fn exists(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    fn lookup(&mut self, key: &Key) -> Option<Value> {
        self.sketch.record(key);
        if let Some(entry) = self.entries.get(key) {
            let value = entry.value.clone();
            if entry.region == Region::Probationary {
                self.promote_to_protected(key);
            } else if entry.region == Region::Protected {
                if let Some(pos) = self.protected.iter().position(|k| k == key) {
                    let k = self.protected.remove(pos).unwrap();
                    self.protected.push_back(k);
                }
            } else {
                Self::remove_from(&mut self.window, key);
                self.window.push_back(key.clone());
            }
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
            let region = entry.region;
            entry.value = value;
            match region {
                Region::Window => self.window_used_bytes = self.window_used_bytes + new_cost - old_cost,
                Region::Probationary => self.main_used_bytes = self.main_used_bytes + new_cost - old_cost,
                Region::Protected => {
                    self.main_used_bytes = self.main_used_bytes + new_cost - old_cost;
                    self.protected_used_bytes = self.protected_used_bytes + new_cost - old_cost;
                }
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
        self.sketch.record(&key);
        let cost = Self::entry_cost(&key, &value);
        self.window.push_back(key.clone());
        self.window_used_bytes += cost;
        self.entries.insert(key, SlotEntry { value, region: Region::Window });
        self.stats.admits += 1;
        Ok(())
    }

    fn get_victim_key(&self) -> Option<Key> {
        self.window.front().or_else(|| self.probationary.front()).cloned()
    }

    fn evict_with_given_key(&mut self, _key: &Key) -> PolicyResult<Option<Value>> {
        Err(PolicyError::FineGrainedOnly)
    }

    fn evict_no_given_key(&mut self, required_bytes: u64) -> PolicyResult<Vec<(Key, Value)>> {
        let mut freed = Vec::new();
        let mut freed_bytes = 0u64;
        while freed_bytes < required_bytes {
            if self.window_used_bytes > self.window_capacity_bytes || !self.window.is_empty() {
                if let Some((k, v)) = self.drain_one_window_candidate() {
                    freed_bytes += object_bytes(&k, &v) + METADATA_OVERHEAD_BYTES;
                    freed.push((k, v));
                    continue;
                }
            }
            // Window empty: fall back to evicting straight from probationary.
            let Some(victim_key) = self.probationary.pop_front() else { break };
            let Some(entry) = self.entries.remove(&victim_key) else { continue };
            let cost = Self::entry_cost(&victim_key, &entry.value);
            self.main_used_bytes = self.main_used_bytes.saturating_sub(cost);
            freed_bytes += cost;
            freed.push((victim_key, entry.value));
            self.stats.evictions += 1;
        }
        Ok(freed)
    }

    fn has_fine_grained_management(&self) -> bool {
        false
    }

    fn size_for_capacity(&self) -> u64 {
        self.window_used_bytes + self.main_used_bytes
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
    fn frequent_candidate_wins_over_cold_main_victim() {
        let mut p = WTinyLfuPolicy::new(100_000, 7);
        p.admit(Key::from_str("cold"), Value::new(vec![0u8; 10])).unwrap();
        // Move cold into main by draining the window once.
        p.drain_one_window_candidate();
        assert!(p.probationary.contains(&Key::from_str("cold")));

        p.admit(Key::from_str("hot"), Value::new(vec![0u8; 10])).unwrap();
        for _ in 0..10 {
            p.lookup(&Key::from_str("hot"));
        }
        let evicted = p.drain_one_window_candidate();
        assert_eq!(evicted.map(|(k, _)| k), Some(Key::from_str("cold")));
        assert!(p.probationary.contains(&Key::from_str("hot")));
    }

    #[test]
    fn coarse_grained_eviction_frees_requested_bytes() {
        let mut p = WTinyLfuPolicy::new(2000, 1);
        for i in 0..30 {
            p.admit(Key::from_str(&format!("k{i}")), Value::new(vec![0u8; 10])).unwrap();
        }
        make_room(&mut p, 300);
        assert!(p.size_for_capacity() <= p.capacity_bytes() + 300);
    }
}
