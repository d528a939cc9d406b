//! Path-namespaced directory of shared data stores.

use meshdata_transport::{PeerToPeer, ServerListener};
use meshdata_types::{Schema, StorePath};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::host::StoreHost;
use crate::protocol::{unexpected, HubClient, HubRequest, HubResponse};
use crate::replica::Replica;
use crate::service::{ServiceCore, SharedDataService};
use crate::stats::{Counters, SharedDataStats};
use crate::{Result, SharedDataError};

enum Mode {
    /// Hosts the authoritative stores and serves them to members.
    Hub {
        host: Arc<StoreHost>,
        listener: ServerListener,
    },
    /// Replicates stores from a hub.
    Member {
        transport: Arc<dyn PeerToPeer>,
        hub_url: String,
        client: HubClient,
    },
}

struct Inner {
    mode: Mode,
    config: ManagerConfig,
    services: Mutex<HashMap<StorePath, SharedDataService>>,
    counters: Arc<Counters>,
    closed: AtomicBool,
}

/// Creates and looks up shared data services, one store per path.
///
/// A hub manager hosts the stores itself and accepts member connections on
/// its own transport listener; a member manager keeps replicas of a hub's
/// stores. Both expose the same API. Clones share the same state.
#[derive(Clone)]
pub struct SharedDataManager {
    inner: Arc<Inner>,
}

impl SharedDataManager {
    /// Starts a hub whose stores are served on a new listener of `transport`.
    pub fn hub(transport: Arc<dyn PeerToPeer>, config: ManagerConfig) -> Result<Self> {
        let host = Arc::new(StoreHost::new(config.host.clone()));
        let listener = transport.create_server_listener(
            config.port,
            config.thread_count,
            host.processor(),
            &config.name,
        )?;
        info!(url = %listener.url(), name = %config.name, "Shared data hub started");
        Ok(Self::with_mode(Mode::Hub { host, listener }, config))
    }

    /// Starts a member replicating stores from the hub at `hub_url`.
    ///
    /// No connection is made until a store is created, opened or listed.
    pub fn member(
        transport: Arc<dyn PeerToPeer>,
        hub_url: &str,
        config: ManagerConfig,
    ) -> Result<Self> {
        let client = HubClient::new(transport.client_request_factory(hub_url)?);
        info!(hub = %hub_url, name = %config.name, "Shared data member started");
        Ok(Self::with_mode(
            Mode::Member {
                transport,
                hub_url: hub_url.to_string(),
                client,
            },
            config,
        ))
    }

    fn with_mode(mode: Mode, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                mode,
                config,
                services: Mutex::new(HashMap::new()),
                counters: Arc::new(Counters::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Url of the hub holding the authoritative stores.
    #[must_use]
    pub fn hub_url(&self) -> &str {
        match &self.inner.mode {
            Mode::Hub { listener, .. } => listener.url(),
            Mode::Member { hub_url, .. } => hub_url,
        }
    }

    /// Returns true if this manager hosts the stores.
    #[must_use]
    pub fn is_hub(&self) -> bool {
        matches!(self.inner.mode, Mode::Hub { .. })
    }

    /// Creates a store at `path`.
    ///
    /// Fails with [`SharedDataError::AlreadyExist`] if one exists.
    pub fn create(&self, path: &StorePath, schema: &Schema) -> Result<()> {
        self.ensure_open()?;
        match &self.inner.mode {
            Mode::Hub { host, .. } => host.create(path, schema).map(|_| ()),
            Mode::Member { client, .. } => match client.send(
                &HubRequest::Create {
                    path: path.clone(),
                    schema: schema.clone(),
                },
                path,
            )? {
                HubResponse::Created => Ok(()),
                other => Err(unexpected(&other)),
            },
        }
    }

    /// Returns the service for `path`, creating the store or a local replica
    /// as needed. Does not wait for the first synchronization; see
    /// [`SharedDataService::wait_for_initialization`].
    pub fn get_shared_data_service(
        &self,
        path: &StorePath,
        schema: &Schema,
    ) -> Result<SharedDataService> {
        self.ensure_open()?;
        let mut services = self.inner.services.lock();
        if let Some(service) = services.get(path).filter(|s| !s.is_stopped()) {
            if service.schema() != schema {
                return Err(SharedDataError::SchemaMismatch(path.clone()));
            }
            return Ok(service.clone());
        }

        let service = self.open_service(path, schema)?;
        services.insert(path.clone(), service.clone());
        debug!(path = %path, "Opened shared data service");
        Ok(service)
    }

    /// Like [`get_shared_data_service`](Self::get_shared_data_service) but
    /// blocks until the first synchronization completes.
    ///
    /// Fails with [`SharedDataError::InitTimeout`] after the configured
    /// `open_timeout`.
    pub fn get_shared_data_service_sync(
        &self,
        path: &StorePath,
        schema: &Schema,
    ) -> Result<SharedDataService> {
        let service = self.get_shared_data_service(path, schema)?;
        let timeout = self.inner.config.open_timeout;
        if !service.wait_for_initialization(timeout) {
            return Err(SharedDataError::InitTimeout {
                path: path.clone(),
                timeout,
            });
        }
        Ok(service)
    }

    fn open_service(&self, path: &StorePath, schema: &Schema) -> Result<SharedDataService> {
        let core = ServiceCore::new(path.clone(), schema.clone(), Arc::clone(&self.inner.counters))?;
        match &self.inner.mode {
            Mode::Hub { host, .. } => {
                let store = host.open(path, schema)?;
                Ok(SharedDataService::local(core, store))
            }
            Mode::Member {
                transport, hub_url, ..
            } => {
                let client = HubClient::new(transport.client_request_factory(hub_url)?);
                let replica = Replica::start(
                    Arc::clone(&core),
                    client,
                    self.inner.config.replica.clone(),
                    self.inner.config.open_timeout,
                )?;
                Ok(SharedDataService::remote(core, replica))
            }
        }
    }

    /// Immediate child paths of `parent` that lead to stores.
    pub fn list_service(&self, parent: &StorePath) -> Result<Vec<StorePath>> {
        self.ensure_open()?;
        match &self.inner.mode {
            Mode::Hub { host, .. } => Ok(host.list(parent)),
            Mode::Member { client, .. } => match client.send(
                &HubRequest::List {
                    parent: parent.clone(),
                },
                parent,
            )? {
                HubResponse::Children { paths } => Ok(paths),
                other => Err(unexpected(&other)),
            },
        }
    }

    /// Counters across every service opened by this manager.
    #[must_use]
    pub fn stats(&self) -> SharedDataStats {
        self.inner.counters.snapshot()
    }

    /// Stops every service and releases the manager's transport resources.
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let services: Vec<SharedDataService> = self
            .inner
            .services
            .lock()
            .drain()
            .map(|(_, service)| service)
            .collect();
        for service in &services {
            service.stop();
        }
        match &self.inner.mode {
            Mode::Hub { host, listener } => {
                host.shutdown();
                listener.stop();
            }
            Mode::Member { client, .. } => client.release(),
        }
        info!(hub = %self.hub_url(), stores = services.len(), "Shared data manager closed");
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SharedDataError::Stopped);
        }
        Ok(())
    }
}

impl fmt::Debug for SharedDataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDataManager")
            .field("hub_url", &self.hub_url())
            .field("is_hub", &self.is_hub())
            .field("closed", &self.is_closed())
            .finish()
    }
}
