//! Per-key locking: shardable reader/writer locks keyed by a hash of the
//! object key, with a fallback single global lock when a policy declares
//! itself coarse-grained (spec §4.1 `hasFineGrainedManagement`, §5).
//!
//! Grounded in `enterprise/cache/lock.rs`'s `DistributedMutex`
//! (fencing tokens, per-resource lock table) but reshaped into a
//! synchronous sharded `RwLock` table: this crate has no network round
//! trip inside a lock-held section, so `parking_lot::RwLock` replaces
//! the `tokio::sync::RwLock` + lease/fencing machinery there, matching
//! `original_source/src/lock/perkey_rwlock.c`'s shape (one rwlock per
//! shard, keys hashed into shards).

use parking_lot::RwLock as PLRwLock;
use std::sync::Arc;

use crate::model::Key;

/// Default shard count (spec §5: "shardCount configurable (default ~1024)").
pub const DEFAULT_SHARD_COUNT: usize = 1024;

enum Mode {
    /// One `RwLock` per shard, selected by `hash(key) mod shardCount`.
    Sharded { shards: Vec<PLRwLock<()>> },
    /// A single global lock, used when the policy is coarse-grained
    /// (`hasFineGrainedManagement() == false`) so that engine mutations and
    /// its own internally-chosen victim set stay serialized as one unit.
    Global(PLRwLock<()>),
}

/// Acquires per-key read/write locks. Cloning shares the underlying lock
/// table (it is reference-counted), matching how the cache wrapper, the
/// directory table, and each edge's worker threads all need a handle to
/// the same lock state.
#[derive(Clone)]
pub struct PerKeyLockTable {
    mode: Arc<Mode>,
}

/// An acquired read guard. Dropping it releases the lock.
pub struct ReadGuard<'a>(parking_lot::RwLockReadGuard<'a, ()>);
/// An acquired write guard. Dropping it releases the lock.
pub struct WriteGuard<'a>(parking_lot::RwLockWriteGuard<'a, ()>);

impl PerKeyLockTable {
    /// A fine-grained table: each key maps to one of `shard_count` locks.
    pub fn sharded(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count).map(|_| PLRwLock::new(())).collect();
        Self {
            mode: Arc::new(Mode::Sharded { shards }),
        }
    }

    /// A coarse-grained table: every key maps to the same single lock.
    pub fn global() -> Self {
        Self {
            mode: Arc::new(Mode::Global(PLRwLock::new(()))),
        }
    }

    fn shard_for(&self, key: &Key, shards: &[PLRwLock<()>]) -> usize {
        (key.stable_hash() as usize) % shards.len()
    }

    pub fn read(&self, key: &Key) -> ReadGuard<'_> {
        match self.mode.as_ref() {
            Mode::Sharded { shards } => {
                let idx = self.shard_for(key, shards);
                ReadGuard(shards[idx].read())
            }
            Mode::Global(lock) => ReadGuard(lock.read()),
        }
    }

    pub fn write(&self, key: &Key) -> WriteGuard<'_> {
        match self.mode.as_ref() {
            Mode::Sharded { shards } => {
                let idx = self.shard_for(key, shards);
                WriteGuard(shards[idx].write())
            }
            Mode::Global(lock) => WriteGuard(lock.write()),
        }
    }

    pub fn is_coarse_grained(&self) -> bool {
        matches!(self.mode.as_ref(), Mode::Global(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn sharded_table_serializes_writers_on_the_same_key() {
        let table = PerKeyLockTable::sharded(8);
        let key = Key::from_str("contended");
        let counter = Arc::new(AtomicUsize::new(0));

        thread::scope(|scope| {
            for _ in 0..16 {
                let table = table.clone();
                let key = key.clone();
                let counter = counter.clone();
                scope.spawn(move || {
                    let _guard = table.write(&key);
                    let before = counter.load(Ordering::SeqCst);
                    thread::yield_now();
                    counter.store(before + 1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn different_keys_can_lock_concurrently_in_sharded_mode() {
        let table = PerKeyLockTable::sharded(1024);
        let a = Key::from_str("a-key-that-hashes-elsewhere");
        let b = Key::from_str("a-totally-different-key");
        let _g1 = table.read(&a);
        let _g2 = table.read(&b);
        // No deadlock: reaching this point is the assertion.
    }

    #[test]
    fn global_mode_reports_coarse_grained() {
        assert!(PerKeyLockTable::global().is_coarse_grained());
        assert!(!PerKeyLockTable::sharded(4).is_coarse_grained());
    }
}
