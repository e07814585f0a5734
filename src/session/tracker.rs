//! Resource trackers: cohort handles for symbol lifetime management.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use super::dylib::Dylib;
use crate::error::JitError;

static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a tracker within its namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackerId(u64);

impl TrackerId {
    pub(crate) fn next() -> Self {
        TrackerId(NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A handle grouping modules (and their symbols) for collective removal.
///
/// Removing a tracker deletes the cohort's symbols from the namespace and
/// cancels its pending materializations; compilations already in flight
/// run to completion but their results are discarded. Executable memory
/// already installed stays mapped until session teardown — another thread
/// may still be executing it.
#[derive(Clone)]
pub struct ResourceTracker {
    id: TrackerId,
    dylib: Weak<Dylib>,
}

impl ResourceTracker {
    pub(crate) fn new(id: TrackerId, dylib: Weak<Dylib>) -> Self {
        Self { id, dylib }
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    /// Remove every symbol and pending module owned by this tracker.
    pub fn remove(&self) -> Result<(), JitError> {
        let dylib = self
            .dylib
            .upgrade()
            .ok_or(JitError::SessionTerminated)?;
        dylib.remove_tracker(self.id);
        Ok(())
    }
}

impl std::fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTracker").field("id", &self.id).finish()
    }
}
