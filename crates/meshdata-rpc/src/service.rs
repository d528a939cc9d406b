//! The service registry.

use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meshdata_codec::{ErasedSerializer, SerializerRegistry};
use meshdata_shared::SharedDataManager;
use meshdata_transport::{PeerToPeer, ServerListener, ServerRequestProcessor, ServerResponseBuilder};
use meshdata_types::EndpointId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RpcConfig;
use crate::definition::{CallArgs, ServiceDef};
use crate::naming::{Naming, NamingEntry};
use crate::protocol::{self, CallRequest};
use crate::proxy::{ClientCore, ServiceProxy};
use crate::shared::{shared_cache, Shared, SharedCache, SharedSerializer};
use crate::stats::{Counters, RpcStats};
use crate::{Result, RpcError};

type ServiceKey = (String, String);

struct Registration {
    def: ServiceDef,
    serializers: Vec<ErasedSerializer>,
}

/// Implementations hosted by this process, answering inbound calls.
struct LocalServices {
    services: DashMap<ServiceKey, Arc<Registration>>,
    serializers: Arc<SerializerRegistry>,
    counters: Arc<Counters>,
}

impl LocalServices {
    fn dispatch(&self, mut request: Bytes, out: &mut BytesMut) -> Result<()> {
        let call = CallRequest::decode(&mut request)?;
        let registration = self
            .services
            .get(&(call.service_type.clone(), call.key.clone()))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RpcError::NotFound {
                service_type: call.service_type.clone(),
                key: call.key.clone(),
            })?;
        let handler = registration
            .def
            .handler(&call.method)
            .ok_or_else(|| RpcError::NoSuchMethod {
                service_type: call.service_type.clone(),
                method: call.method.clone(),
            })?;

        let mut args = CallArgs::new(&self.serializers, &registration.serializers, call.args);
        let mut result = BytesMut::new();
        handler(&mut args, &mut result)?;
        protocol::write_ok(out, &result)
    }

    fn processor(self: &Arc<Self>) -> Arc<dyn ServerRequestProcessor> {
        let local = Arc::clone(self);
        Arc::new(move |request: Bytes, mut response: ServerResponseBuilder| {
            local.counters.call_served();
            let out = response.response_stream();
            if let Err(e) = local.dispatch(request, out) {
                debug!(error = %e, "Call failed");
                if let Err(e) = protocol::write_error(out, &e) {
                    response.fail(e);
                    return;
                }
            }
            response.complete();
        })
    }
}

/// Registers local implementations and calls remote ones.
///
/// Registrations are published in the naming store so that any peer sharing
/// the same hub can discover them. Clones share the same registry.
///
/// Remote calls inherit the transport's request timeout and are never
/// retried here.
#[derive(Clone)]
pub struct RpcService {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: EndpointId,
    listener: ServerListener,
    local: Arc<LocalServices>,
    client: Arc<ClientCore>,
    shared_cache: SharedCache,
    stopped: AtomicBool,
}

impl RpcService {
    /// Starts a listener for inbound calls and opens the naming store
    /// through `manager`.
    pub fn start(
        transport: Arc<dyn PeerToPeer>,
        manager: &SharedDataManager,
        config: RpcConfig,
    ) -> Result<Self> {
        let serializers = Arc::new(SerializerRegistry::with_defaults());
        let counters = Arc::new(Counters::default());
        let local = Arc::new(LocalServices {
            services: DashMap::new(),
            serializers: Arc::clone(&serializers),
            counters: Arc::clone(&counters),
        });
        let listener = transport.create_server_listener(
            config.port,
            config.thread_count,
            local.processor(),
            &config.name,
        )?;
        let naming = Naming::open(manager)?;
        let endpoint = EndpointId::new(listener.url(), &config.name);
        info!(endpoint = %endpoint, "RPC service started");

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint,
                listener,
                local,
                client: Arc::new(ClientCore::new(
                    transport,
                    naming,
                    serializers,
                    counters,
                    config.max_connections,
                )),
                shared_cache: shared_cache(config.shared_cache_capacity),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// Url inbound calls arrive on.
    #[must_use]
    pub fn url(&self) -> &str {
        self.inner.listener.url()
    }

    /// This process's identity in the naming store.
    #[must_use]
    pub fn endpoint(&self) -> &EndpointId {
        &self.inner.endpoint
    }

    /// Serializers shared by every registration and proxy.
    #[must_use]
    pub fn serializers(&self) -> &SerializerRegistry {
        &self.inner.client.serializers
    }

    /// Registers the serializer for [`Shared<V>`] results.
    ///
    /// Both the owner and its callers must register `V`.
    pub fn register_shared<V>(&self)
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.serializers().add_serializer::<Shared<V>, _>(SharedSerializer::<V>::new(
            Arc::clone(&self.inner.shared_cache),
        ));
    }

    /// Binds `def` to `(service_type, key)` and publishes it.
    ///
    /// Fails with [`RpcError::Conflict`] if the key is registered in this
    /// process or published by another peer.
    pub fn register(
        &self,
        service_type: &str,
        key: &str,
        def: ServiceDef,
        serializers: Vec<ErasedSerializer>,
    ) -> Result<()> {
        self.ensure_running()?;
        let id = (service_type.to_string(), key.to_string());
        let conflict = || RpcError::Conflict {
            service_type: service_type.to_string(),
            key: key.to_string(),
        };

        match self.inner.local.services.entry(id.clone()) {
            Entry::Occupied(_) => return Err(conflict()),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Registration { def, serializers }));
            }
        }

        let entry = NamingEntry {
            service_type: service_type.to_string(),
            key: key.to_string(),
            url: self.url().to_string(),
            process: self.inner.endpoint.name().to_string(),
        };
        if let Err(e) = self.inner.client.naming.publish(&entry) {
            self.inner.local.services.remove(&id);
            return Err(e);
        }
        self.inner.local.counters.registered();
        info!(service_type, key, url = %self.url(), "Registered service");
        Ok(())
    }

    /// Removes a local registration and withdraws it from the naming store.
    /// Returns false if there was none.
    ///
    /// The local registration is gone even when the withdrawal fails; the
    /// error reports the naming entry left behind.
    pub fn unregister(&self, service_type: &str, key: &str) -> Result<bool> {
        let id = (service_type.to_string(), key.to_string());
        if self.inner.local.services.remove(&id).is_none() {
            return Ok(false);
        }
        self.inner.local.counters.unregistered();
        info!(service_type, key, "Unregistered service");
        self.inner
            .client
            .naming
            .withdraw(service_type, key, self.url())?;
        Ok(true)
    }

    /// Removes every local registration.
    ///
    /// Local state is always cleared. Withdrawals are attempted for every
    /// key; the first failure is returned after all have been tried.
    pub fn reset(&self) -> Result<()> {
        let ids: Vec<ServiceKey> = self
            .inner
            .local
            .services
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut first_error = None;
        for (service_type, key) in ids {
            if let Err(e) = self.unregister(&service_type, &key) {
                warn!(service_type = %service_type, key = %key, error = %e, "Could not withdraw registration");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// A proxy that looks the key up in the naming store on every call.
    pub fn get_service(
        &self,
        service_type: &str,
        key: &str,
        serializers: Vec<ErasedSerializer>,
    ) -> Result<ServiceProxy> {
        self.ensure_running()?;
        self.inner.client.resolve(service_type, key)?;
        Ok(ServiceProxy::named(
            Arc::clone(&self.inner.client),
            service_type,
            key,
            serializers,
        ))
    }

    /// A proxy bound to the key's current url with its own connection
    /// resources, released when the proxy is dropped.
    pub fn get_temporary_service(
        &self,
        service_type: &str,
        key: &str,
        serializers: Vec<ErasedSerializer>,
    ) -> Result<ServiceProxy> {
        self.ensure_running()?;
        ServiceProxy::temporary(Arc::clone(&self.inner.client), service_type, key, serializers)
    }

    /// Keys published for `service_type` by any peer.
    pub fn list_service(&self, service_type: &str) -> Result<BTreeSet<String>> {
        self.inner.client.naming.keys(service_type)
    }

    /// Every published registration, from every peer.
    pub fn naming_entries(&self) -> Result<Vec<NamingEntry>> {
        self.inner.client.naming.entries(None)
    }

    /// Writes one line per local registration.
    pub fn dump_registered(&self, out: &mut impl io::Write) -> io::Result<()> {
        let mut lines: Vec<String> = self
            .inner
            .local
            .services
            .iter()
            .map(|entry| {
                let (service_type, key) = entry.key();
                let methods: Vec<&str> = entry.value().def.method_names().collect();
                format!("{service_type}/{key} -> {} [{}]", self.url(), methods.join(", "))
            })
            .collect();
        if lines.is_empty() {
            return writeln!(out, "(no registered services)");
        }
        lines.sort();
        for line in lines {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    /// Call counters.
    #[must_use]
    pub fn stats(&self) -> RpcStats {
        RpcStats {
            connections: self.inner.client.connection_count(),
            ..self.inner.local.counters.snapshot()
        }
    }

    /// Withdraws every registration, stops the listener and releases pooled
    /// connections. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.reset() {
            warn!(error = %e, "Could not withdraw registrations");
        }
        self.inner.listener.stop();
        self.inner.client.close();
        info!(endpoint = %self.inner.endpoint, "RPC service stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(RpcError::Stopped);
        }
        Ok(())
    }
}

impl fmt::Debug for RpcService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcService")
            .field("endpoint", &self.inner.endpoint)
            .field("registered", &self.inner.local.services.len())
            .finish()
    }
}
