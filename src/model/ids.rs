use std::sync::atomic::{AtomicU64, Ordering};

/// Index of an edge within the fixed fleet topology (spec §4.3.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeIdx(pub u32);

impl EdgeIdx {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for EdgeIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "edge#{}", self.0)
    }
}

/// A monotonically increasing request sequence number, attributed per
/// process. Used to correlate client requests with their eventual
/// responses across the simulated transport (spec §3 supplement: the
/// distillation drops this bookkeeping detail but the message catalog in
/// §6 needs it to match requests to responses out of order).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

/// Monotonic generator for `RequestId`s, one per edge/client process.
#[derive(Debug, Default)]
pub struct RequestIdGenerator(AtomicU64);

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_monotonic_and_unique() {
        let gen = RequestIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }
}
