//! Directory table: per-beacon `Map<Key, DirectoryEntry>` tracking which
//! edges hold a replica of a key and whether each replica is currently
//! valid (spec §3 `DirectoryTable`, §4.3.2). Grounded in
//! `original_source/src/cooperation/directory_table.{h,c}`.
//!
//! Backed by `dashmap` rather than a `Mutex<HashMap<_>>` guarded
//! externally: dashmap's per-shard locking is exactly the "operations
//! internally synchronized by the cache wrapper's per-key lock at the
//! beacon" the spec calls for, without a second lock table duplicating
//! that guarantee.

use std::collections::HashMap;

use dashmap::DashMap;
use rand::seq::IteratorRandom;

use crate::hashdht::EdgeAddr;
use crate::model::{EdgeIdx, Key};

/// Identifies one replica location: the edge holding the data, and the
/// beacon address a requester should use to reach the directory owning
/// this key (spec §3 `DirectoryInfo`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DirectoryInfo {
    pub target_edge_idx: EdgeIdx,
    pub beacon_addr: EdgeAddr,
}

/// Per-replica validity flag (spec §3 `DirectoryMetadata`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryMetadata {
    pub valid: bool,
}

pub type DirectoryEntry = HashMap<DirectoryInfo, DirectoryMetadata>;

/// The five-way lookup result specified in spec §4.3.2: whether any
/// replica is known, whether a valid one was found, a uniformly-random
/// choice among valid replicas that is never the requester itself, and
/// whether the requester already has its own (possibly invalid) entry.
#[derive(Debug, Clone)]
pub struct DirectoryLookup {
    pub any_cached: bool,
    pub valid_dirinfo_exists: bool,
    pub chosen_dirinfo: Option<DirectoryInfo>,
    pub is_source_cached: bool,
}

#[derive(Default)]
pub struct DirectoryTable {
    entries: DashMap<Key, DirectoryEntry>,
}

impl DirectoryTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// `chosenDirinfo` is picked uniformly at random from the subset of
    /// valid `DirectoryInfo`s whose `targetEdgeIdx != sourceEdgeIdx`, so a
    /// redirect never sends the requester to itself (spec §4.3.2, §8
    /// invariant 4 "No self-redirect").
    pub fn lookup(&self, key: &Key, source_edge_idx: EdgeIdx) -> DirectoryLookup {
        let Some(entry) = self.entries.get(key) else {
            return DirectoryLookup {
                any_cached: false,
                valid_dirinfo_exists: false,
                chosen_dirinfo: None,
                is_source_cached: false,
            };
        };

        let is_source_cached = entry.keys().any(|d| d.target_edge_idx == source_edge_idx);
        let valid_candidates: Vec<DirectoryInfo> = entry
            .iter()
            .filter(|(d, m)| m.valid && d.target_edge_idx != source_edge_idx)
            .map(|(d, _)| *d)
            .collect();
        let valid_dirinfo_exists = entry.values().any(|m| m.valid);

        let chosen_dirinfo = valid_candidates.into_iter().choose(&mut rand::thread_rng());

        DirectoryLookup {
            any_cached: !entry.is_empty(),
            valid_dirinfo_exists,
            chosen_dirinfo,
            is_source_cached,
        }
    }

    /// Adds or removes one `DirectoryInfo`. Removing the last one for `K`
    /// deletes the `DirectoryEntry` (spec §4.3.2 `update`).
    pub fn update(&self, key: &Key, is_admit: bool, dirinfo: DirectoryInfo, metadata: DirectoryMetadata) {
        if is_admit {
            self.entries.entry(key.clone()).or_default().insert(dirinfo, metadata);
        } else if let Some(mut entry) = self.entries.get_mut(key) {
            entry.remove(&dirinfo);
            if entry.is_empty() {
                drop(entry);
                self.entries.remove(key);
            }
        }
    }

    pub fn is_global_cached(&self, key: &Key) -> bool {
        self.entries.get(key).map(|e| !e.is_empty()).unwrap_or(false)
    }

    pub fn is_cooperatively_cached(&self, key: &Key) -> bool {
        self.is_global_cached(key)
    }

    /// Sets every metadata for `K` to invalid; returns the affected
    /// dirinfos for the caller to fan out invalidation RPCs (spec §4.3.2).
    pub fn invalidate_all_dirinfo_for_key_if_exist(&self, key: &Key) -> Vec<DirectoryInfo> {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Vec::new();
        };
        let affected: Vec<DirectoryInfo> = entry.keys().copied().collect();
        for meta in entry.values_mut() {
            meta.valid = false;
        }
        affected
    }

    /// Flips one metadata back to valid (used by the post-write
    /// resynchronization step, spec §4.3.3 `releaseLocalWritelock`).
    pub fn validate_dirinfo_for_key_if_exist(&self, key: &Key, dirinfo: DirectoryInfo) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if let Some(meta) = entry.get_mut(&dirinfo) {
                meta.valid = true;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(edge: u32, beacon_edge: u32) -> DirectoryInfo {
        DirectoryInfo {
            target_edge_idx: EdgeIdx(edge),
            beacon_addr: EdgeAddr {
                ip: std::net::Ipv4Addr::new(10, 0, 0, beacon_edge as u8),
                beacon_port: 7000 + beacon_edge as u16,
                cache_port: 8000 + beacon_edge as u16,
            },
        }
    }

    #[test]
    fn lookup_never_chooses_the_requesting_edge() {
        let table = DirectoryTable::new();
        let key = Key::from_str("k");
        table.update(&key, true, info(1, 0), DirectoryMetadata { valid: true });
        table.update(&key, true, info(2, 0), DirectoryMetadata { valid: true });

        for _ in 0..50 {
            let result = table.lookup(&key, EdgeIdx(1));
            if let Some(chosen) = result.chosen_dirinfo {
                assert_ne!(chosen.target_edge_idx, EdgeIdx(1));
            }
        }
    }

    #[test]
    fn removing_last_dirinfo_deletes_the_entry() {
        let table = DirectoryTable::new();
        let key = Key::from_str("k");
        let d = info(1, 0);
        table.update(&key, true, d, DirectoryMetadata { valid: true });
        assert!(table.is_global_cached(&key));
        table.update(&key, false, d, DirectoryMetadata { valid: true });
        assert!(!table.is_global_cached(&key));
        assert_eq!(table.entry_count(), 0);
    }

    #[test]
    fn invalidate_all_marks_every_replica_invalid() {
        let table = DirectoryTable::new();
        let key = Key::from_str("k");
        table.update(&key, true, info(1, 0), DirectoryMetadata { valid: true });
        table.update(&key, true, info(2, 0), DirectoryMetadata { valid: true });
        let affected = table.invalidate_all_dirinfo_for_key_if_exist(&key);
        assert_eq!(affected.len(), 2);
        let lookup = table.lookup(&key, EdgeIdx(99));
        assert!(!lookup.valid_dirinfo_exists);
    }

    #[test]
    fn validate_flips_one_replica_back_to_valid() {
        let table = DirectoryTable::new();
        let key = Key::from_str("k");
        let d = info(1, 0);
        table.update(&key, true, d, DirectoryMetadata { valid: true });
        table.invalidate_all_dirinfo_for_key_if_exist(&key);
        table.validate_dirinfo_for_key_if_exist(&key, d);
        let lookup = table.lookup(&key, EdgeIdx(99));
        assert!(lookup.valid_dirinfo_exists);
    }
}
