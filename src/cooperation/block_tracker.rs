//! Block tracker: the per-key MSI write-lock state machine (spec §3
//! `BlockTracker`, §4.3.3). A CAS on `writeFlag` is the linearization
//! point for acquiring the writer slot; `blockedEdges` accumulates the
//! addresses of edges whose lookup arrived while the flag was held, to be
//! unblocked when the writer releases. Grounded in
//! `original_source/src/cooperation/cooperation_wrapper_base.{h,c}`, whose
//! `acquireLocalWritelockByCacheServer`/`ByBeaconServer`/`releaseLocalWritelock`
//! implement this state machine directly (the header's own
//! `cooperation/block_tracker.h` include is not present in this tree).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::hashdht::EdgeAddr;
use crate::model::{EdgeIdx, Key};

use super::directory::{DirectoryInfo, DirectoryTable};

/// Outcome of an acquire attempt (spec §4.3.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The key is not cooperatively cached anywhere: no lock is needed.
    Noneed,
    /// The CAS won; caller now holds the writer slot. Carries the set of
    /// `DirectoryInfo`s invalidated as a side effect, for fan-out.
    Success(Vec<DirectoryInfo>),
    /// Another writer holds the slot. The caller (cache-server path) must
    /// retry or fall through; the beacon-server path instead enqueues the
    /// requester's address.
    Failure,
}

/// Outcome of a release (spec §4.3.3 `releaseLocalWritelock`): the
/// addresses drained from `blockedEdges`, to be notified with
/// `FinishBlock`.
pub struct ReleaseOutcome {
    pub unblocked: Vec<EdgeAddr>,
}

struct KeyBlockState {
    write_flag: AtomicBool,
    /// Insertion-ordered and deduplicated so `release_local_writelock`
    /// drains requesters in the order they attempted the acquire (spec §8
    /// scenario 6 "MSI fairness").
    blocked_edges: Mutex<VecDeque<EdgeAddr>>,
}

impl Default for KeyBlockState {
    fn default() -> Self {
        Self {
            write_flag: AtomicBool::new(false),
            blocked_edges: Mutex::new(VecDeque::new()),
        }
    }
}

#[derive(Default)]
pub struct BlockTracker {
    states: DashMap<Key, KeyBlockState>,
}

impl BlockTracker {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Cache-server-initiated acquire (spec §4.3.3): on CAS failure,
    /// simply reports `Failure` with no enqueue — the cache-server path
    /// retries or falls through itself rather than waiting on a beacon
    /// push.
    pub fn acquire_local_writelock_by_cache_server(
        &self,
        key: &Key,
        directory: &DirectoryTable,
        _source_edge: EdgeIdx,
    ) -> AcquireOutcome {
        if !directory.is_cooperatively_cached(key) {
            return AcquireOutcome::Noneed;
        }
        let state = self.states.entry(key.clone()).or_default();
        match state
            .write_flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                let invalidated = directory.invalidate_all_dirinfo_for_key_if_exist(key);
                AcquireOutcome::Success(invalidated)
            }
            Err(_) => AcquireOutcome::Failure,
        }
    }

    /// Beacon-server-initiated acquire: on CAS failure, enqueues
    /// `requester_addr` in `blockedEdges` so the writer's eventual release
    /// pushes it a `FinishBlock` (spec §4.3.3).
    pub fn acquire_local_writelock_by_beacon_server(
        &self,
        key: &Key,
        directory: &DirectoryTable,
        requester_addr: EdgeAddr,
    ) -> AcquireOutcome {
        if !directory.is_cooperatively_cached(key) {
            return AcquireOutcome::Noneed;
        }
        let state = self.states.entry(key.clone()).or_default();
        match state
            .write_flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                let invalidated = directory.invalidate_all_dirinfo_for_key_if_exist(key);
                AcquireOutcome::Success(invalidated)
            }
            Err(_) => {
                let mut blocked = state.blocked_edges.lock();
                if !blocked.contains(&requester_addr) {
                    blocked.push_back(requester_addr);
                }
                AcquireOutcome::Failure
            }
        }
    }

    /// Clears `writeFlag`, drains `blockedEdges`, and re-validates the
    /// writer's own replica so it is immediately considered valid (spec
    /// §4.3.3 `releaseLocalWritelock`).
    pub fn release_local_writelock(
        &self,
        key: &Key,
        directory: &DirectoryTable,
        sender_dirinfo: DirectoryInfo,
    ) -> ReleaseOutcome {
        let unblocked = if let Some(state) = self.states.get(key) {
            state.write_flag.store(false, Ordering::Release);
            state.blocked_edges.lock().drain(..).collect()
        } else {
            Vec::new()
        };
        directory.validate_dirinfo_for_key_if_exist(key, sender_dirinfo);
        ReleaseOutcome { unblocked }
    }

    pub fn is_write_locked(&self, key: &Key) -> bool {
        self.states
            .get(key)
            .map(|s| s.write_flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooperation::directory::DirectoryMetadata;

    fn addr(n: u8) -> EdgeAddr {
        EdgeAddr {
            ip: std::net::Ipv4Addr::new(10, 0, 0, n),
            beacon_port: 7000 + n as u16,
            cache_port: 8000 + n as u16,
        }
    }

    fn info(edge: u32) -> DirectoryInfo {
        DirectoryInfo {
            target_edge_idx: EdgeIdx(edge),
            beacon_addr: addr(edge as u8),
        }
    }

    #[test]
    fn noneed_when_not_cooperatively_cached() {
        let directory = DirectoryTable::new();
        let tracker = BlockTracker::new();
        let key = Key::from_str("k");
        assert_eq!(
            tracker.acquire_local_writelock_by_cache_server(&key, &directory, EdgeIdx(0)),
            AcquireOutcome::Noneed
        );
    }

    #[test]
    fn second_concurrent_acquire_fails_and_is_exclusive() {
        let directory = DirectoryTable::new();
        let tracker = BlockTracker::new();
        let key = Key::from_str("k");
        directory.update(&key, true, info(1), DirectoryMetadata { valid: true });

        let first = tracker.acquire_local_writelock_by_cache_server(&key, &directory, EdgeIdx(0));
        assert!(matches!(first, AcquireOutcome::Success(_)));

        let second = tracker.acquire_local_writelock_by_cache_server(&key, &directory, EdgeIdx(2));
        assert_eq!(second, AcquireOutcome::Failure);
    }

    #[test]
    fn beacon_acquire_enqueues_requester_on_failure() {
        let directory = DirectoryTable::new();
        let tracker = BlockTracker::new();
        let key = Key::from_str("k");
        directory.update(&key, true, info(1), DirectoryMetadata { valid: true });

        tracker.acquire_local_writelock_by_cache_server(&key, &directory, EdgeIdx(0));
        let outcome =
            tracker.acquire_local_writelock_by_beacon_server(&key, &directory, addr(5));
        assert_eq!(outcome, AcquireOutcome::Failure);

        let release = tracker.release_local_writelock(&key, &directory, info(0));
        assert_eq!(release.unblocked, vec![addr(5)]);
        assert!(!tracker.is_write_locked(&key));
    }

    #[test]
    fn release_unblocks_beacon_requesters_in_attempt_order() {
        let directory = DirectoryTable::new();
        let tracker = BlockTracker::new();
        let key = Key::from_str("k");
        directory.update(&key, true, info(1), DirectoryMetadata { valid: true });

        tracker.acquire_local_writelock_by_cache_server(&key, &directory, EdgeIdx(0));
        for n in [7u8, 3, 9, 1] {
            tracker.acquire_local_writelock_by_beacon_server(&key, &directory, addr(n));
        }

        let release = tracker.release_local_writelock(&key, &directory, info(0));
        assert_eq!(release.unblocked, vec![addr(7), addr(3), addr(9), addr(1)]);
    }

    #[test]
    fn release_revalidates_the_writers_own_replica() {
        let directory = DirectoryTable::new();
        let tracker = BlockTracker::new();
        let key = Key::from_str("k");
        directory.update(&key, true, info(1), DirectoryMetadata { valid: true });
        directory.update(&key, true, info(0), DirectoryMetadata { valid: true });

        tracker.acquire_local_writelock_by_cache_server(&key, &directory, EdgeIdx(0));
        let lookup = directory.lookup(&key, EdgeIdx(99));
        assert!(!lookup.valid_dirinfo_exists);

        tracker.release_local_writelock(&key, &directory, info(0));
        let lookup = directory.lookup(&key, EdgeIdx(99));
        assert!(lookup.valid_dirinfo_exists);
    }
}
