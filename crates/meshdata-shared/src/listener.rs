//! Ordered change delivery.
//!
//! Each service owns one delivery thread draining a single channel. Change
//! sets, resets and listener registrations all travel through that channel,
//! so listeners observe them in send order and may register or remove
//! listeners from inside a callback.

use meshdata_types::{ChangeSet, StorePath};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::stats::Counters;
use crate::{Result, SharedDataError};

/// Receives the change stream of one store.
pub trait ChangeListener: Send + Sync {
    /// Called once per committed change set, in version order.
    fn event(&self, change_set: &ChangeSet) -> anyhow::Result<()>;

    /// Called instead of [`event`](Self::event) when incremental changes
    /// were lost and the listener must rebuild its view by re-reading the
    /// store.
    fn reset(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) enum DeliveryMessage {
    Add(ListenerId, Arc<dyn ChangeListener>),
    Remove(ListenerId),
    Event(ChangeSet),
    Reset,
    Shutdown,
}

/// Sending half of a delivery thread.
#[derive(Clone)]
pub(crate) struct Delivery {
    tx: mpsc::UnboundedSender<DeliveryMessage>,
}

impl Delivery {
    /// Spawns the delivery thread for `path`.
    pub(crate) fn spawn(path: &StorePath, counters: Arc<Counters>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = path.to_string();
        thread::Builder::new()
            .name(format!("delivery:{store}"))
            .spawn(move || run(store, rx, counters))?;
        Ok(Self { tx })
    }

    pub(crate) fn add(&self, listener: Arc<dyn ChangeListener>) -> Result<ListenerId> {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.send(DeliveryMessage::Add(id, listener))?;
        Ok(id)
    }

    pub(crate) fn remove(&self, id: ListenerId) -> Result<()> {
        self.send(DeliveryMessage::Remove(id))
    }

    pub(crate) fn event(&self, change_set: ChangeSet) {
        let _ = self.send(DeliveryMessage::Event(change_set));
    }

    pub(crate) fn reset(&self) {
        let _ = self.send(DeliveryMessage::Reset);
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.send(DeliveryMessage::Shutdown);
    }

    fn send(&self, message: DeliveryMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| SharedDataError::Stopped)
    }
}

fn run(store: String, mut rx: mpsc::UnboundedReceiver<DeliveryMessage>, counters: Arc<Counters>) {
    let mut listeners: BTreeMap<ListenerId, Arc<dyn ChangeListener>> = BTreeMap::new();

    while let Some(message) = rx.blocking_recv() {
        match message {
            DeliveryMessage::Add(id, listener) => {
                listeners.insert(id, listener);
            }
            DeliveryMessage::Remove(id) => {
                listeners.remove(&id);
            }
            DeliveryMessage::Event(change_set) => {
                for (id, listener) in &listeners {
                    isolate(&store, *id, "event", || listener.event(&change_set));
                }
                counters.change_set_delivered();
            }
            DeliveryMessage::Reset => {
                for (id, listener) in &listeners {
                    isolate(&store, *id, "reset", || listener.reset());
                }
                counters.reset_delivered();
            }
            DeliveryMessage::Shutdown => break,
        }
    }
    debug!(store = %store, "Delivery thread finished");
}

/// Runs one callback so that neither an error nor a panic stops delivery to
/// the remaining listeners.
fn isolate(store: &str, id: ListenerId, callback: &str, f: impl FnOnce() -> anyhow::Result<()>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(store = %store, listener = %id, callback, error = %e, "Listener failed");
        }
        Err(_) => {
            error!(store = %store, listener = %id, callback, "Listener panicked");
        }
    }
}
