//! Engine activity counters.
//!
//! Counters are updated with relaxed atomics; they are observability data,
//! not synchronization. The exactly-once materialization tests read
//! `modules_compiled` to verify that contention does not duplicate work.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters, incremented by the engine and session.
#[derive(Debug, Default)]
pub struct Counters {
    pub modules_added: AtomicU64,
    pub modules_compiled: AtomicU64,
    pub lookups: AtomicU64,
    pub generator_hits: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            modules_added: self.modules_added.load(Ordering::Relaxed),
            modules_compiled: self.modules_compiled.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            generator_hits: self.generator_hits.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of engine activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Modules registered via `add_module`.
    pub modules_added: u64,
    /// Modules actually materialized (compiled and linked).
    pub modules_compiled: u64,
    /// Symbol lookups served, successful or not.
    pub lookups: u64,
    /// Lookups satisfied by a namespace generator.
    pub generator_hits: u64,
}
