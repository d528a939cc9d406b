//! One-way initialization latch.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Opens once and stays open. Any number of threads may wait on it.
#[derive(Debug, Default)]
pub(crate) struct InitLatch {
    open: Mutex<bool>,
    opened: Condvar,
}

impl InitLatch {
    pub(crate) fn open(&self) {
        let mut open = self.open.lock();
        if !*open {
            *open = true;
            self.opened.notify_all();
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Returns whether the latch opened before `timeout` elapsed.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock();
        while !*open {
            if self.opened.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}
