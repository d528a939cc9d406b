//! Client-side handles on remote services.

use bytes::{Bytes, BytesMut};
use lru::LruCache;
use meshdata_codec::{ErasedSerializer, SerializerRegistry};
use meshdata_transport::{call, ClientRequestFactory, PeerToPeer};
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::naming::Naming;
use crate::protocol::{self, CallRequest};
use crate::stats::Counters;
use crate::{Result, RpcError};

/// State every proxy created by one registry shares.
pub(crate) struct ClientCore {
    pub(crate) transport: Arc<dyn PeerToPeer>,
    pub(crate) naming: Naming,
    pub(crate) serializers: Arc<SerializerRegistry>,
    pub(crate) counters: Arc<Counters>,
    factories: Mutex<LruCache<String, Arc<dyn ClientRequestFactory>>>,
    closed: AtomicBool,
}

impl ClientCore {
    pub(crate) fn new(
        transport: Arc<dyn PeerToPeer>,
        naming: Naming,
        serializers: Arc<SerializerRegistry>,
        counters: Arc<Counters>,
        max_connections: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(max_connections).unwrap_or(NonZeroUsize::MIN);
        Self {
            transport,
            naming,
            serializers,
            counters,
            factories: Mutex::new(LruCache::new(capacity)),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Stopped);
        }
        Ok(())
    }

    /// Url currently hosting `key`, per the naming store.
    pub(crate) fn resolve(&self, service_type: &str, key: &str) -> Result<String> {
        self.naming
            .lookup(service_type, key)?
            .map(|entry| entry.url)
            .ok_or_else(|| RpcError::NotFound {
                service_type: service_type.to_string(),
                key: key.to_string(),
            })
    }

    /// Pooled factory for `url`, created on first use. The least recently
    /// used factory is released once the pool is full.
    fn factory(&self, url: &str) -> Result<Arc<dyn ClientRequestFactory>> {
        let mut factories = self.factories.lock();
        // Checked under the lock so `close` cannot race a new insertion.
        self.ensure_open()?;
        if let Some(factory) = factories.get(url) {
            return Ok(Arc::clone(factory));
        }
        let factory = self.transport.client_request_factory(url)?;
        if let Some((evicted_url, evicted)) = factories.push(url.to_string(), Arc::clone(&factory)) {
            if evicted_url != url {
                debug!(url = %evicted_url, "Released idle client factory");
                evicted.release();
            }
        }
        Ok(factory)
    }

    /// Drops `failed` from the pool unless it was already replaced.
    fn evict(&self, failed: &Arc<dyn ClientRequestFactory>) {
        let mut factories = self.factories.lock();
        let current = factories.peek(failed.url()).is_some_and(|f| Arc::ptr_eq(f, failed));
        if current {
            factories.pop(failed.url());
            drop(factories);
            debug!(url = %failed.url(), "Released failed client factory");
            failed.release();
        }
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.factories.lock().len()
    }

    /// Releases every pooled factory; later calls fail with
    /// [`RpcError::Stopped`].
    pub(crate) fn close(&self) {
        let mut factories = self.factories.lock();
        self.closed.store(true, Ordering::Release);
        for (_, factory) in factories.iter() {
            factory.release();
        }
        factories.clear();
    }
}

enum Route {
    /// Looked up in the naming store on every call.
    Named,
    /// Bound at creation; released when the proxy drops.
    Temporary(Arc<dyn ClientRequestFactory>),
}

/// A handle for calling one registered service.
///
/// Arguments and results are encoded with the serializers passed when the
/// proxy was created, then the registry's. Calls block until the callee
/// answers or the transport gives up; they are never retried.
pub struct ServiceProxy {
    service_type: String,
    key: String,
    serializers: Vec<ErasedSerializer>,
    route: Route,
    core: Arc<ClientCore>,
}

impl ServiceProxy {
    pub(crate) fn named(
        core: Arc<ClientCore>,
        service_type: &str,
        key: &str,
        serializers: Vec<ErasedSerializer>,
    ) -> Self {
        Self {
            service_type: service_type.to_string(),
            key: key.to_string(),
            serializers,
            route: Route::Named,
            core,
        }
    }

    pub(crate) fn temporary(
        core: Arc<ClientCore>,
        service_type: &str,
        key: &str,
        serializers: Vec<ErasedSerializer>,
    ) -> Result<Self> {
        let url = core.resolve(service_type, key)?;
        let factory = core.transport.client_request_factory(&url)?;
        Ok(Self {
            service_type: service_type.to_string(),
            key: key.to_string(),
            serializers,
            route: Route::Temporary(factory),
            core,
        })
    }

    /// Service type this proxy calls.
    #[must_use]
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Registration key this proxy calls.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true if transport resources are released on drop.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self.route, Route::Temporary(_))
    }

    /// Calls a method taking no arguments.
    pub fn call0<R: 'static>(&self, method: &str) -> Result<R> {
        self.invoke(method, Vec::new())
    }

    /// Calls a method taking one argument.
    pub fn call1<A: 'static, R: 'static>(&self, method: &str, a: &A) -> Result<R> {
        let args = vec![self.encode(a)?];
        self.invoke(method, args)
    }

    /// Calls a method taking two arguments.
    pub fn call2<A: 'static, B: 'static, R: 'static>(
        &self,
        method: &str,
        a: &A,
        b: &B,
    ) -> Result<R> {
        let args = vec![self.encode(a)?, self.encode(b)?];
        self.invoke(method, args)
    }

    fn encode<T: 'static>(&self, value: &T) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.core
            .serializers
            .encode(value, &mut buf, &self.serializers)?;
        Ok(buf.freeze())
    }

    fn invoke<R: 'static>(&self, method: &str, args: Vec<Bytes>) -> Result<R> {
        let request = CallRequest {
            service_type: self.service_type.clone(),
            key: self.key.clone(),
            method: method.to_string(),
            args,
        };
        let result = self.round_trip(&request);
        self.core.counters.call_made(result.is_ok());
        let mut reply = result?;
        Ok(self.core.serializers.decode(&mut reply, &self.serializers)?)
    }

    fn round_trip(&self, request: &CallRequest) -> Result<Bytes> {
        self.core.ensure_open()?;
        let (factory, pooled) = match &self.route {
            Route::Named => {
                let url = self.core.resolve(&self.service_type, &self.key)?;
                (self.core.factory(&url)?, true)
            }
            Route::Temporary(factory) => (Arc::clone(factory), false),
        };
        let mut encoded = BytesMut::new();
        request.encode(&mut encoded)?;
        debug!(
            service_type = %request.service_type,
            key = %request.key,
            method = %request.method,
            url = %factory.url(),
            "Calling"
        );
        let reply = match call(factory.as_ref(), &encoded) {
            Ok(reply) => reply,
            Err(e) => {
                if pooled {
                    self.core.evict(&factory);
                }
                return Err(e.into());
            }
        };
        protocol::read_reply(reply, request)
    }
}

impl Drop for ServiceProxy {
    fn drop(&mut self) {
        if let Route::Temporary(factory) = &self.route {
            factory.release();
        }
    }
}

impl fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("service_type", &self.service_type)
            .field("key", &self.key)
            .field("temporary", &self.is_temporary())
            .finish()
    }
}
