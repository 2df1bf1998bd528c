//! Propagation simulation & clock: injects configured one-way latencies
//! (client<->edge, edge<->edge, edge<->cloud) around message exchanges for
//! deterministic performance study, bypassable per-message by a "skip
//! propagation" flag used during warm-up (spec §2, §4.4). Also the single
//! concrete [`Transport`] this crate needs: an in-process `SimTransport`
//! handing [`Envelope`]s between edges' queues, since real sockets are out
//! of scope (spec §1 Non-goals).
//!
//! Grounded in `enterprise::cluster::transport` (`Message`,
//! `Envelope`, a pluggable transport trait) and in
//! `other_examples/.../PaperCache-paper-cache__src-worker-policy.rs`'s
//! `crossbeam_channel` work-queue substrate for the blocking-pop-with-
//! shutdown-signal shape (spec §5 `finish_condition_fn`).

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use thiserror::Error;

use crate::message::Envelope;
use crate::model::EdgeIdx;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no queue registered for edge {0}")]
    UnknownEdge(u32),
    #[error("transport is shutting down")]
    ShuttingDown,
    #[error("peer queue closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Which leg of the topology a message is crossing, selecting which
/// configured one-way latency applies (spec §6 CLI surface
/// `--propagation_latency_{clientedge,crossedge,edgecloud}_us`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hop {
    ClientEdge,
    CrossEdge,
    EdgeCloud,
}

/// One-way latencies, in microseconds, per hop kind (spec §2 "Propagation
/// simulation & clock").
#[derive(Clone, Copy, Debug)]
pub struct PropagationConfig {
    pub client_edge_us: u64,
    pub cross_edge_us: u64,
    pub edge_cloud_us: u64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            client_edge_us: 500,
            cross_edge_us: 2_000,
            edge_cloud_us: 20_000,
        }
    }
}

impl PropagationConfig {
    pub fn latency(&self, hop: Hop) -> Duration {
        let us = match hop {
            Hop::ClientEdge => self.client_edge_us,
            Hop::CrossEdge => self.cross_edge_us,
            Hop::EdgeCloud => self.edge_cloud_us,
        };
        Duration::from_micros(us)
    }
}

/// How long a blocking pop polls the shutdown flag between checks.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

type Queue = (Sender<Envelope>, Receiver<Envelope>);

/// An in-process simulated transport: one unbounded queue per edge plus
/// one for the origin ("cloud"), with a propagation-latency sleep applied
/// to every send unless the envelope (or warm-up mode) opts out. Callers
/// are the request dispatcher's worker threads.
pub struct SimTransport {
    edges: DashMap<EdgeIdx, Queue>,
    cloud: Queue,
    propagation: PropagationConfig,
    /// Forces every send to skip its propagation sleep, regardless of the
    /// per-envelope flag — used during warm-up (spec §2 "bypassable by a
    /// 'skip propagation' flag used during warm-up").
    skip_all: AtomicBool,
    running: Arc<AtomicBool>,
}

impl SimTransport {
    pub fn new(edge_count: u32, propagation: PropagationConfig) -> Self {
        let edges = DashMap::new();
        for i in 0..edge_count {
            edges.insert(EdgeIdx(i), unbounded());
        }
        Self {
            edges,
            cloud: unbounded(),
            propagation,
            skip_all: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_warm_up(&self, warming_up: bool) {
        self.skip_all.store(warming_up, Ordering::Release);
    }

    fn sleep_for(&self, envelope: &Envelope, hop: Hop) {
        if envelope.skip_propagation || self.skip_all.load(Ordering::Acquire) {
            return;
        }
        std::thread::sleep(self.propagation.latency(hop));
    }

    pub fn send_to_edge(&self, to: EdgeIdx, envelope: Envelope, hop: Hop) -> TransportResult<()> {
        self.sleep_for(&envelope, hop);
        let queue = self.edges.get(&to).ok_or(TransportError::UnknownEdge(to.0))?;
        queue.0.send(envelope).map_err(|_| TransportError::Closed)
    }

    pub fn send_to_cloud(&self, envelope: Envelope) -> TransportResult<()> {
        self.sleep_for(&envelope, Hop::EdgeCloud);
        self.cloud.0.send(envelope).map_err(|_| TransportError::Closed)
    }

    /// Blocks until an envelope arrives for `edge` or the transport is
    /// shut down, polling the running flag between waits so shutdown wakes
    /// every pending consumer (spec §5 `finish_condition_fn`).
    pub fn recv_at_edge(&self, edge: EdgeIdx) -> TransportResult<Envelope> {
        let queue = self.edges.get(&edge).ok_or(TransportError::UnknownEdge(edge.0))?;
        loop {
            if !self.running.load(Ordering::Acquire) {
                return Err(TransportError::ShuttingDown);
            }
            match queue.1.recv_timeout(POLL_INTERVAL) {
                Ok(envelope) => return Ok(envelope),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
            }
        }
    }

    pub fn recv_at_cloud(&self) -> TransportResult<Envelope> {
        loop {
            if !self.running.load(Ordering::Acquire) {
                return Err(TransportError::ShuttingDown);
            }
            match self.cloud.1.recv_timeout(POLL_INTERVAL) {
                Ok(envelope) => return Ok(envelope),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
            }
        }
    }

    /// Process-wide running flag (spec §5): workers exit their loops and
    /// blocking pops return "no element" once this flips.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

pub fn loopback_addr(edge: EdgeIdx) -> (Ipv4Addr, u16) {
    (Ipv4Addr::new(127, 0, 0, 1), 9000 + edge.0 as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBody;
    use crate::model::Key;

    fn envelope(skip: bool) -> Envelope {
        let mut env = Envelope::new(
            EdgeIdx(0),
            (Ipv4Addr::new(127, 0, 0, 1), 9000),
            MessageBody::LocalGetRequest { key: Key::from_str("k") },
        );
        env.skip_propagation = skip;
        env
    }

    #[test]
    fn send_then_recv_delivers_the_envelope() {
        let transport = SimTransport::new(2, PropagationConfig::default());
        transport.send_to_edge(EdgeIdx(1), envelope(true), Hop::CrossEdge).unwrap();
        let received = transport.recv_at_edge(EdgeIdx(1)).unwrap();
        assert_eq!(received.source_edge_idx, EdgeIdx(0));
    }

    #[test]
    fn shutdown_unblocks_a_pending_receiver() {
        let transport = Arc::new(SimTransport::new(1, PropagationConfig::default()));
        let t2 = transport.clone();
        let handle = std::thread::spawn(move || t2.recv_at_edge(EdgeIdx(0)));
        std::thread::sleep(Duration::from_millis(20));
        transport.shutdown();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(TransportError::ShuttingDown)));
    }

    #[test]
    fn warm_up_mode_skips_propagation_sleep_regardless_of_flag() {
        let transport = SimTransport::new(1, PropagationConfig {
            client_edge_us: 0,
            cross_edge_us: 50_000,
            edge_cloud_us: 0,
        });
        transport.set_warm_up(true);
        let started = std::time::Instant::now();
        transport.send_to_edge(EdgeIdx(0), envelope(false), Hop::CrossEdge).unwrap();
        assert!(started.elapsed() < Duration::from_millis(40));
    }
}
