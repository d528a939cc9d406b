//! Call counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RpcStats {
    /// Outbound calls issued.
    pub calls_made: u64,
    /// Outbound calls that returned an error.
    pub calls_failed: u64,
    /// Inbound calls handled.
    pub calls_served: u64,
    /// Local registrations currently live.
    pub registered: u64,
    /// Client factories currently held open to remote peers.
    pub connections: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    calls_made: AtomicU64,
    calls_failed: AtomicU64,
    calls_served: AtomicU64,
    registered: AtomicU64,
}

impl Counters {
    pub(crate) fn call_made(&self, ok: bool) {
        self.calls_made.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.calls_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn call_served(&self) {
        self.calls_served.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn registered(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unregistered(&self) {
        self.registered.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RpcStats {
        RpcStats {
            calls_made: self.calls_made.load(Ordering::Relaxed),
            calls_failed: self.calls_failed.load(Ordering::Relaxed),
            calls_served: self.calls_served.load(Ordering::Relaxed),
            registered: self.registered.load(Ordering::Relaxed),
            connections: 0,
        }
    }
}
