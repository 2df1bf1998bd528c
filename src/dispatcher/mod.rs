//! Request dispatcher: the client-facing GET/PUT/DEL state machines and
//! the beacon-side coordination they drive (spec §4.4). A [`Cluster`]
//! owns every edge's [`CacheWrapper`], every edge's [`Beacon`], the DHT,
//! and an in-memory `Origin` standing in for the shared backing store
//! (§1 Non-goals: origin persistence is out of scope, so a plain map
//! suffices as its stand-in here).
//!
//! Grounded in `original_source/src/cache_server/` and
//! `src/beacon_server/` (the two request-handling loops the original
//! splits the dispatcher into) and, for the threaded worker-over-a-queue
//! shape, `enterprise::cluster::transport`'s consumer loop.
//! `Cluster`'s GET/PUT/DEL methods implement the protocol directly against
//! in-process edge/beacon state (each edge's own internal locking already
//! provides the "per-key lock" synchronization the protocol calls for);
//! [`run_cache_server_worker`] additionally demonstrates the threaded,
//! transport-queue-driven worker shape spec §5 describes, for whichever
//! message kinds benefit from being modeled as a real wire hop (here,
//! `LocalGetRequest`/`LocalGetResponse`).

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use crate::config::Params;
use crate::cooperation::{AcquireOutcome, Beacon, CoopError, DhtWrapper, DirectoryInfo, DirectoryMetadata};
use crate::hashdht::Topology;
use crate::lock::DEFAULT_SHARD_COUNT;
use crate::message::{Envelope, HitFlag, MessageBody};
use crate::model::{EdgeIdx, Key, Value};
use crate::policy::{build_policy, object_bytes, PolicyError};
use crate::transport::{Hop, PropagationConfig, SimTransport};
use crate::wrapper::CacheWrapper;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("unknown edge index {0}")]
    UnknownEdge(u32),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Coop(#[from] CoopError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Stand-in for the shared origin store (§1 Non-goals excludes real
/// persistence; the dispatcher only needs `get/put/del`, per spec §6's
/// `Global{Get,Put,Del}` message bodies).
#[derive(Default)]
pub struct Origin {
    store: DashMap<Key, Value>,
}

impl Origin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Key) -> Option<Value> {
        self.store.get(key).map(|v| v.clone())
    }

    pub fn put(&self, key: Key, value: Value) {
        self.store.insert(key, value);
    }

    pub fn del(&self, key: &Key) {
        self.store.insert(key.clone(), Value::tombstone());
    }
}

/// The whole simulated fleet: every edge's cache wrapper and beacon, the
/// DHT, the origin, and the transport (used by [`run_cache_server_worker`]
/// for the threaded demonstration path).
pub struct Cluster {
    edges: Vec<CacheWrapper>,
    beacons: Vec<Beacon>,
    dht: DhtWrapper,
    origin: Origin,
    pub transport: Arc<SimTransport>,
    params: Params,
}

impl Cluster {
    pub fn new(params: Params) -> Self {
        let topology = Topology::new(params.edgecnt);
        let dht = DhtWrapper::new(topology);
        let mut edges = Vec::with_capacity(params.edgecnt as usize);
        let mut beacons = Vec::with_capacity(params.edgecnt as usize);
        for i in 0..params.edgecnt {
            let policy = build_policy(params.cache_name, params.capacity_bytes(), params.rng_seed.wrapping_add(i as u64));
            edges.push(CacheWrapper::new(policy, DEFAULT_SHARD_COUNT));
            beacons.push(Beacon::new());
        }
        let propagation = PropagationConfig {
            client_edge_us: params.propagation.client_edge_us,
            cross_edge_us: params.propagation.cross_edge_us,
            edge_cloud_us: params.propagation.edge_cloud_us,
        };
        let transport = Arc::new(SimTransport::new(params.edgecnt, propagation));
        Self {
            edges,
            beacons,
            dht,
            origin: Origin::new(),
            transport,
            params,
        }
    }

    pub fn edge_count(&self) -> u32 {
        self.params.edgecnt
    }

    fn edge(&self, idx: EdgeIdx) -> DispatchResult<&CacheWrapper> {
        self.edges.get(idx.0 as usize).ok_or(DispatchError::UnknownEdge(idx.0))
    }

    fn beacon(&self, idx: EdgeIdx) -> DispatchResult<&Beacon> {
        self.beacons.get(idx.0 as usize).ok_or(DispatchError::UnknownEdge(idx.0))
    }

    fn beacon_for_key(&self, key: &Key) -> EdgeIdx {
        self.dht.beacon_edge_for(key)
    }

    fn dirinfo_for(&self, key: &Key, edge: EdgeIdx) -> DirectoryInfo {
        DirectoryInfo {
            target_edge_idx: edge,
            beacon_addr: self.dht.beacon_addr_for(key),
        }
    }

    /// Client GET path (spec §4.4): local check, cooperative redirect,
    /// origin fallback, admission decision.
    pub fn client_get(&self, client_edge: EdgeIdx, key: &Key) -> DispatchResult<(Option<Value>, HitFlag)> {
        let span = tracing::info_span!("client_get", edge = client_edge.0, key = %key);
        let _enter = span.enter();

        let e = self.edge(client_edge)?;

        // (1) Local validity check.
        if let Some(value) = e.get(key, false) {
            tracing::debug!("local hit");
            return Ok((Some(value), HitFlag::LocalHit));
        }

        // (2) Cooperation check.
        let beacon_idx = self.beacon_for_key(key);
        let beacon = self.beacon(beacon_idx)?;
        let lookup = beacon.lookup(key, client_edge);
        let mut fallthrough_hint = None;

        if beacon.is_write_locked(key) {
            tracing::debug!("beacon reports write in progress, falling through to origin");
        } else if let Some(chosen) = lookup.chosen_dirinfo {
            // (3) Redirect.
            let peer = self.edge(chosen.target_edge_idx)?;
            if let Some(value) = peer.get(key, true) {
                tracing::debug!(peer = chosen.target_edge_idx.0, "cooperative hit");
                return Ok((Some(value), HitFlag::CooperativeHit));
            }
            if peer.is_local_cached(key) {
                tracing::debug!(peer = chosen.target_edge_idx.0, "cooperative invalid, falling through to origin");
                fallthrough_hint = Some(HitFlag::CooperativeInvalid);
            }
        }

        // (4) Origin fetch.
        let value = self.origin.get(key);
        let is_valid = !beacon.is_write_locked(key);

        // (5) Admission decision.
        if let Some(ref v) = value {
            if e.need_independent_admit(key, v) && e.can_admit(v.len()) {
                e.make_room(object_bytes(key, v))?;
                e.admit(key.clone(), v.clone(), lookup.any_cached, is_valid)?;
                if e.is_cooperation_aware() {
                    beacon.update(key, true, self.dirinfo_for(key, client_edge), DirectoryMetadata { valid: is_valid });
                    self.background_place(beacon_idx, key, v, is_valid, client_edge);
                }
            }
        }

        Ok((value, fallthrough_hint.unwrap_or(HitFlag::GlobalMiss)))
    }

    pub fn client_put(&self, client_edge: EdgeIdx, key: &Key, value: Value) -> DispatchResult<()> {
        self.client_write(client_edge, key, value)
    }

    pub fn client_del(&self, client_edge: EdgeIdx, key: &Key) -> DispatchResult<()> {
        self.client_write(client_edge, key, Value::tombstone())
    }

    /// Client PUT/DEL path (spec §4.4): local update, origin write,
    /// writelock acquisition, peer invalidation fan-out, release.
    fn client_write(&self, client_edge: EdgeIdx, key: &Key, value: Value) -> DispatchResult<()> {
        let span = tracing::info_span!("client_write", edge = client_edge.0, key = %key, is_delete = value.is_deleted());
        let _enter = span.enter();

        let e = self.edge(client_edge)?;

        // (1) Local update.
        e.update(key, value.clone(), false)?;

        // (2) Origin write.
        if value.is_deleted() {
            self.origin.del(key);
        } else {
            self.origin.put(key.clone(), value.clone());
        }

        // (3) Acquire writelock at the beacon.
        let beacon_idx = self.beacon_for_key(key);
        let beacon = self.beacon(beacon_idx)?;
        match beacon.acquire_writelock_by_cache_server(key, client_edge) {
            AcquireOutcome::Noneed => {}
            AcquireOutcome::Success(invalidated) => {
                // (4) Invalidate peers.
                for dirinfo in &invalidated {
                    if dirinfo.target_edge_idx == client_edge {
                        continue;
                    }
                    if let Ok(peer) = self.edge(dirinfo.target_edge_idx) {
                        peer.invalidate_key_for_local_cached_object(key);
                    }
                }
                // (5) Release, re-validating the writer's own entry.
                let sender_dirinfo = self.dirinfo_for(key, client_edge);
                beacon.release_writelock(key, sender_dirinfo);
            }
            AcquireOutcome::Failure => {
                tracing::warn!("write lock contended");
                return Err(DispatchError::Coop(CoopError::WriteLockContended));
            }
        }

        Ok(())
    }

    /// Background placement for cooperation-aware policies (spec §4.4
    /// "Background placement (covered only)"): if the just-admitted key is
    /// among the admitting edge's top popular keys, proactively replicate
    /// it onto up to `covered_topk_edgecnt` neighbor edges that are
    /// themselves running a cooperation-aware policy.
    ///
    /// The original chooses placement targets from observed cross-edge
    /// demand signals this crate doesn't model; we approximate with the
    /// lowest-indexed eligible neighbors (see DESIGN.md's resolution of
    /// this open question).
    fn background_place(&self, beacon_idx: EdgeIdx, key: &Key, value: &Value, is_valid: bool, origin_edge: EdgeIdx) {
        let Ok(beacon) = self.beacon(beacon_idx) else { return };
        let Ok(origin_cache) = self.edge(origin_edge) else { return };
        let candidates = origin_cache.top_popular_keys(self.params.covered.topk_edgecnt);
        if !candidates.contains(key) {
            return;
        }

        let targets = (0..self.params.edgecnt)
            .map(EdgeIdx)
            .filter(|idx| *idx != origin_edge)
            .take(self.params.covered.topk_edgecnt);

        for target in targets {
            let Ok(target_cache) = self.edge(target) else { continue };
            if !target_cache.is_cooperation_aware() || target_cache.is_local_cached(key) {
                continue;
            }
            if !target_cache.can_admit(value.len()) {
                continue;
            }
            if target_cache.make_room(object_bytes(key, value)).is_err() {
                continue;
            }
            if target_cache.admit(key.clone(), value.clone(), true, is_valid).is_ok() {
                beacon.update(key, true, self.dirinfo_for(key, target), DirectoryMetadata { valid: is_valid });
            }
        }
    }
}

/// A cache-server worker loop (spec §5: "N cache-server worker threads...
/// handling client/peer/beacon/origin messages drawn from a shared work
/// queue"). Pulls `LocalGetRequest` envelopes off `edge`'s transport queue,
/// answers them via [`Cluster::client_get`], and replies onto the
/// requesting edge's own queue (the simulator's stand-in for a client
/// reply channel). Returns when the transport shuts down.
pub fn run_cache_server_worker(cluster: Arc<Cluster>, edge: EdgeIdx) {
    loop {
        let envelope = match cluster.transport.recv_at_edge(edge) {
            Ok(env) => env,
            Err(_) => return,
        };
        if let MessageBody::LocalGetRequest { key } = envelope.body {
            let outcome = cluster.client_get(edge, &key);
            let (value, hitflag) = outcome.unwrap_or((None, HitFlag::GlobalMiss));
            let response = Envelope::new(
                edge,
                envelope.source_addr,
                MessageBody::LocalGetResponse { key, value, hitflag },
            )
            .skip_propagation();
            let _ = cluster.transport.send_to_edge(envelope.source_edge_idx, response, Hop::ClientEdge);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(edgecnt: u32) -> Cluster {
        let mut params = Params::default();
        params.edgecnt = edgecnt;
        params.capacity_mb = 1;
        Cluster::new(params)
    }

    #[test]
    fn cold_read_is_routed_cooperatively() {
        let c = cluster(2);
        let key = Key::from_str("foo");
        c.edge(EdgeIdx(1))
            .unwrap()
            .admit(key.clone(), Value::from("bar"), false, true)
            .unwrap();
        let beacon_idx = c.beacon_for_key(&key);
        c.beacon(beacon_idx)
            .unwrap()
            .update(&key, true, c.dirinfo_for(&key, EdgeIdx(1)), DirectoryMetadata { valid: true });

        let (value, hitflag) = c.client_get(EdgeIdx(0), &key).unwrap();
        assert_eq!(value, Some(Value::from("bar")));
        assert_eq!(hitflag, HitFlag::CooperativeHit);
        assert!(!c.edge(EdgeIdx(0)).unwrap().is_local_cached(&key));
    }

    #[test]
    fn write_invalidates_cached_peers() {
        let c = cluster(2);
        let key = Key::from_str("k");
        c.edge(EdgeIdx(0)).unwrap().admit(key.clone(), Value::from("v"), false, true).unwrap();
        c.edge(EdgeIdx(1)).unwrap().admit(key.clone(), Value::from("v"), false, true).unwrap();
        let beacon_idx = c.beacon_for_key(&key);
        c.beacon(beacon_idx)
            .unwrap()
            .update(&key, true, c.dirinfo_for(&key, EdgeIdx(0)), DirectoryMetadata { valid: true });
        c.beacon(beacon_idx)
            .unwrap()
            .update(&key, true, c.dirinfo_for(&key, EdgeIdx(1)), DirectoryMetadata { valid: true });

        c.client_put(EdgeIdx(0), &key, Value::from("v2")).unwrap();

        assert!(!c.edge(EdgeIdx(1)).unwrap().is_valid_key_for_local_cached_object(&key));
        assert_eq!(c.origin.get(&key), Some(Value::from("v2")));
    }

    #[test]
    fn second_concurrent_writer_is_rejected_with_contended_error() {
        let c = cluster(2);
        let key = Key::from_str("k");
        c.edge(EdgeIdx(0)).unwrap().admit(key.clone(), Value::from("v"), false, true).unwrap();
        c.edge(EdgeIdx(1)).unwrap().admit(key.clone(), Value::from("v"), false, true).unwrap();
        let beacon_idx = c.beacon_for_key(&key);
        c.beacon(beacon_idx)
            .unwrap()
            .update(&key, true, c.dirinfo_for(&key, EdgeIdx(0)), DirectoryMetadata { valid: true });
        c.beacon(beacon_idx)
            .unwrap()
            .update(&key, true, c.dirinfo_for(&key, EdgeIdx(1)), DirectoryMetadata { valid: true });

        c.beacon(beacon_idx).unwrap().acquire_writelock_by_cache_server(&key, EdgeIdx(0));

        let result = c.client_put(EdgeIdx(1), &key, Value::from("v2"));
        assert!(matches!(result, Err(DispatchError::Coop(CoopError::WriteLockContended))));
    }

    #[test]
    fn worker_thread_answers_a_local_get_request_over_the_transport() {
        let c = Arc::new(cluster(2));
        let key = Key::from_str("remote");
        c.edge(EdgeIdx(1))
            .unwrap()
            .admit(key.clone(), Value::from("value"), false, true)
            .unwrap();
        c.beacon(EdgeIdx(0))
            .unwrap()
            .update(&key, true, c.dirinfo_for(&key, EdgeIdx(1)), DirectoryMetadata { valid: true });

        let worker_cluster = c.clone();
        let handle = std::thread::spawn(move || run_cache_server_worker(worker_cluster, EdgeIdx(0)));

        let request = Envelope::new(
            EdgeIdx(1),
            crate::transport::loopback_addr(EdgeIdx(1)),
            MessageBody::LocalGetRequest { key: key.clone() },
        )
        .skip_propagation();
        c.transport.send_to_edge(EdgeIdx(0), request, Hop::ClientEdge).unwrap();

        let response = c.transport.recv_at_edge(EdgeIdx(1)).unwrap();
        match response.body {
            MessageBody::LocalGetResponse { value, hitflag, .. } => {
                assert_eq!(value, Some(Value::from("value")));
                assert_eq!(hitflag, HitFlag::CooperativeHit);
            }
            other => panic!("unexpected response body: {other:?}"),
        }

        c.transport.shutdown();
        handle.join().unwrap();
    }
}
