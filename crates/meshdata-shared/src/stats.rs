//! Manager-wide counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the manager counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SharedDataStats {
    /// Services currently open.
    pub stores_open: u64,
    /// Change sets handed to listeners.
    pub change_sets_delivered: u64,
    /// Resets handed to listeners.
    pub resets_delivered: u64,
    /// Full resynchronizations performed by replicas.
    pub resyncs: u64,
    /// Commits issued through this manager.
    pub commits: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    stores_open: AtomicU64,
    change_sets_delivered: AtomicU64,
    resets_delivered: AtomicU64,
    resyncs: AtomicU64,
    commits: AtomicU64,
}

impl Counters {
    pub(crate) fn store_opened(&self) {
        self.stores_open.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn store_closed(&self) {
        self.stores_open.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn change_set_delivered(&self) {
        self.change_sets_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset_delivered(&self) {
        self.resets_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn resynced(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn committed(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SharedDataStats {
        SharedDataStats {
            stores_open: self.stores_open.load(Ordering::Relaxed),
            change_sets_delivered: self.change_sets_delivered.load(Ordering::Relaxed),
            resets_delivered: self.resets_delivered.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }
}
