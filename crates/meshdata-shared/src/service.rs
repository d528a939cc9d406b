//! Handles on individual stores.

use meshdata_types::{ChangeSet, Schema, StorePath};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::host::HostedStore;
use crate::latch::InitLatch;
use crate::listener::{ChangeListener, Delivery, ListenerId};
use crate::replica::Replica;
use crate::repository::{Repository, SharedData};
use crate::stats::Counters;
use crate::store::{Operation, RecordSet};
use crate::{Result, SharedDataError};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by a service handle and whatever keeps its data current.
pub(crate) struct ServiceCore {
    pub(crate) path: StorePath,
    pub(crate) schema: Schema,
    pub(crate) delivery: Delivery,
    pub(crate) latch: InitLatch,
    pub(crate) counters: Arc<Counters>,
    id: AtomicU64,
    stopped: AtomicBool,
}

impl ServiceCore {
    pub(crate) fn new(path: StorePath, schema: Schema, counters: Arc<Counters>) -> Result<Arc<Self>> {
        let delivery = Delivery::spawn(&path, Arc::clone(&counters))?;
        Ok(Arc::new(Self {
            path,
            schema,
            delivery,
            latch: InitLatch::default(),
            counters,
            id: AtomicU64::new(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed)),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Assigns a fresh store id after the connection was re-established.
    pub(crate) fn renew_id(&self) -> u64 {
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        self.id.store(id, Ordering::Release);
        id
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

enum Backend {
    /// The store lives in this process's host.
    Local {
        store: Arc<HostedStore>,
        subscription: u64,
    },
    /// The store is replicated from a remote hub.
    Remote(Arc<Replica>),
}

struct Inner {
    core: Arc<ServiceCore>,
    backend: Backend,
}

impl Inner {
    fn stop(&self) {
        if self.core.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.backend {
            Backend::Local {
                store,
                subscription,
            } => store.unsubscribe(*subscription),
            Backend::Remote(replica) => replica.stop(),
        }
        self.core.delivery.shutdown();
        self.core.counters.store_closed();
        info!(path = %self.core.path, "Shared data service stopped");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A handle on one shared data store.
///
/// Clones share the same store, listeners and id. Reads see a consistent
/// snapshot; writes are serialized per store and reach every listener, local
/// and remote, in commit order.
#[derive(Clone)]
pub struct SharedDataService {
    inner: Arc<Inner>,
}

impl SharedDataService {
    pub(crate) fn local(core: Arc<ServiceCore>, store: Arc<HostedStore>) -> Self {
        let subscription = store.subscribe(core.delivery.clone());
        core.latch.open();
        core.counters.store_opened();
        Self {
            inner: Arc::new(Inner {
                core,
                backend: Backend::Local {
                    store,
                    subscription,
                },
            }),
        }
    }

    pub(crate) fn remote(core: Arc<ServiceCore>, replica: Arc<Replica>) -> Self {
        core.counters.store_opened();
        Self {
            inner: Arc::new(Inner {
                core,
                backend: Backend::Remote(replica),
            }),
        }
    }

    fn core(&self) -> &ServiceCore {
        &self.inner.core
    }

    /// The store path.
    #[must_use]
    pub fn path(&self) -> &StorePath {
        &self.core().path
    }

    /// The store schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.core().schema
    }

    /// The connection-scoped store id.
    ///
    /// A new id is assigned whenever the replica reconnects, and every
    /// service opened for a path gets its own. Fails once stopped.
    pub fn id(&self) -> Result<u64> {
        self.ensure_running()?;
        Ok(self.core().id.load(Ordering::Acquire))
    }

    /// The last store version visible locally.
    #[must_use]
    pub fn version(&self) -> u64 {
        match &self.inner.backend {
            Backend::Local { store, .. } => store.version(),
            Backend::Remote(replica) => replica.version(),
        }
    }

    /// Runs `data` against the current snapshot without mutation.
    pub fn read<'d, D: SharedData>(&self, data: &'d mut D) -> Result<&'d mut D> {
        self.ensure_running()?;
        let reader = |schema: &Schema, records: &RecordSet| -> Result<()> {
            let mut repository = Repository::reader(schema, records);
            data.data(&mut repository)
        };
        match &self.inner.backend {
            Backend::Local { store, .. } => store.read(reader)?,
            Backend::Remote(replica) => replica.read(reader)?,
        }
        Ok(data)
    }

    /// Runs `data` in write mode and commits what it staged.
    ///
    /// When this returns, the change set has been applied to the local view
    /// and queued for every listener.
    pub fn write<'d, D: SharedData>(&self, data: &'d mut D) -> Result<&'d mut D> {
        self.write_change_set(data)?;
        Ok(data)
    }

    /// Like [`write`](Self::write) but returns the committed change set.
    pub fn write_change_set<D: SharedData>(&self, data: &mut D) -> Result<ChangeSet> {
        self.ensure_running()?;
        let build = |schema: &Schema, records: &RecordSet| -> Result<Vec<Operation>> {
            let mut repository = Repository::writer(schema, records);
            data.data(&mut repository)?;
            Ok(repository.into_operations())
        };
        let change_set = match &self.inner.backend {
            Backend::Local { store, .. } => store.write_with(build)?,
            Backend::Remote(replica) => replica.write_with(build)?,
        };
        if !change_set.is_empty() {
            self.core().counters.committed();
        }
        Ok(change_set)
    }

    /// Registers a listener. Delivery is FIFO on this store's delivery
    /// thread; the listener sees change sets committed after registration.
    pub fn listen(&self, listener: Arc<dyn ChangeListener>) -> Result<ListenerId> {
        self.ensure_running()?;
        self.core().delivery.add(listener)
    }

    /// Removes a listener.
    pub fn remove(&self, id: ListenerId) -> Result<()> {
        self.ensure_running()?;
        self.core().delivery.remove(id)
    }

    /// Returns true once the first synchronization completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.core().latch.is_open()
    }

    /// Blocks until the first synchronization completes or `timeout`
    /// elapses. Returns whether initialization completed.
    pub fn wait_for_initialization(&self, timeout: Duration) -> bool {
        self.core().latch.wait(timeout)
    }

    /// Disconnects from the store, releases transport resources and
    /// invalidates the id. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Returns true once stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.core().is_stopped()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(SharedDataError::Stopped);
        }
        Ok(())
    }
}

impl fmt::Debug for SharedDataService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDataService")
            .field("path", self.path())
            .field("id", &self.core().id.load(Ordering::Relaxed))
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
