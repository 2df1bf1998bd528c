//! Crate-wide error taxonomy.
//!
//! One `thiserror` enum per subsystem, the way `EnterpriseError`,
//! `TransportError`, and `RaftError` sit side by side in
//! (`enterprise/mod.rs`, `enterprise/cluster/transport.rs`,
//! `enterprise/cluster/raft.rs`); `CacheError` aggregates them for callers
//! that cross subsystem boundaries (the dispatcher, the binaries).

use thiserror::Error;

use crate::cooperation::CoopError;
use crate::dispatcher::DispatchError;
use crate::policy::PolicyError;
use crate::transport::TransportError;

/// Top-level error taxonomy (spec §7).
#[derive(Error, Debug)]
pub enum CacheError {
    /// Tried to admit an object whose object+metadata bytes exceed capacity.
    #[error("capacity exceeded: object of {requested} bytes cannot fit in {capacity} bytes")]
    CapacityExceeded { requested: u64, capacity: u64 },

    /// Policy-specific rejection (e.g. larger than one SLRU segment).
    #[error("invalid object size for policy: {0}")]
    InvalidObjectSize(String),

    /// Directory lookup returned `none` when the caller expected a replica.
    #[error("no directory entry for key")]
    DirectoryMissing,

    /// A network wait exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// `AcquireWritelock` returned `Failure`; the requester was enqueued.
    #[error("write lock contended, enqueued for key")]
    WriteLockContended,

    /// An internal consistency check failed. Always a bug.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Coop(#[from] CoopError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub type CacheResult<T> = Result<T, CacheError>;
