//! In-process transport for tests and single-process meshes.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::server::open_frame;
use crate::{
    ClientRequest, ClientRequestFactory, Exchange, PeerToPeer, Result, ServerListener,
    ServerRequestProcessor, ServerResponseBuilder, TransportConfig, TransportError, TransportUrl,
    WorkerPool,
};

const SCHEME: &str = "mem";
const FIRST_EPHEMERAL_PORT: u16 = 40000;

/// Transport whose endpoints live in a shared in-process table.
///
/// Clones share the same table, so a listener created through one clone is
/// reachable through every other.
#[derive(Clone)]
pub struct MemoryTransport {
    network: Arc<Network>,
    config: TransportConfig,
}

struct Network {
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
    next_port: AtomicU16,
}

struct Endpoint {
    processor: Arc<dyn ServerRequestProcessor>,
    pool: Arc<WorkerPool>,
}

impl MemoryTransport {
    /// Creates a transport with its own empty endpoint table.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TransportConfig {
            host: "localhost".to_string(),
            ..TransportConfig::default()
        })
    }

    /// Creates a transport with explicit settings.
    #[must_use]
    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            network: Arc::new(Network {
                endpoints: RwLock::new(HashMap::new()),
                next_port: AtomicU16::new(FIRST_EPHEMERAL_PORT),
            }),
            config,
        }
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.network.endpoints.read().len()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerToPeer for MemoryTransport {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn create_server_listener(
        &self,
        port: Option<u16>,
        thread_count: usize,
        processor: Arc<dyn ServerRequestProcessor>,
        name: &str,
    ) -> Result<ServerListener> {
        let pool = Arc::new(WorkerPool::new(name, thread_count)?);
        let mut endpoints = self.network.endpoints.write();

        let port = match port {
            Some(port) => port,
            None => loop {
                let candidate = self.network.next_port.fetch_add(1, Ordering::Relaxed);
                let key = TransportUrl::new(SCHEME, &self.config.host, candidate).authority();
                if !endpoints.contains_key(&key) {
                    break candidate;
                }
            },
        };
        let url = TransportUrl::new(SCHEME, &self.config.host, port);
        let key = url.authority();
        if endpoints.contains_key(&key) {
            return Err(TransportError::AddressInUse(key));
        }
        endpoints.insert(
            key.clone(),
            Arc::new(Endpoint {
                processor,
                pool: Arc::clone(&pool),
            }),
        );
        drop(endpoints);

        let network = Arc::clone(&self.network);
        Ok(ServerListener::new(url.to_string(), name, port, pool, move || {
            network.endpoints.write().remove(&key);
        }))
    }

    fn client_request_factory(&self, url: &str) -> Result<Arc<dyn ClientRequestFactory>> {
        let parsed = TransportUrl::parse_with_scheme(url, SCHEME)?;
        Ok(Arc::new(MemoryClientFactory {
            url: url.to_string(),
            key: parsed.authority(),
            network: Arc::clone(&self.network),
            timeout: self.config.request_timeout,
            released: AtomicBool::new(false),
        }))
    }
}

struct MemoryClientFactory {
    url: String,
    key: String,
    network: Arc<Network>,
    timeout: Duration,
    released: AtomicBool,
}

impl ClientRequestFactory for MemoryClientFactory {
    fn url(&self) -> &str {
        &self.url
    }

    fn create_request(&self) -> Result<ClientRequest> {
        if self.released.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(ClientRequest::new(Box::new(MemoryExchange {
            key: self.key.clone(),
            network: Arc::clone(&self.network),
            timeout: self.timeout,
        })))
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            debug!(url = %self.url, "Released memory client factory");
        }
    }
}

struct MemoryExchange {
    key: String,
    network: Arc<Network>,
    timeout: Duration,
}

impl Exchange for MemoryExchange {
    fn round_trip(&mut self, request: Bytes) -> Result<Bytes> {
        let endpoint = self
            .network
            .endpoints
            .read()
            .get(&self.key)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(self.key.clone()))?;

        let slot = Arc::new(ReplySlot::default());
        let filler = Arc::clone(&slot);
        let response = ServerResponseBuilder::new(move |frame| filler.fill(frame));
        let processor = Arc::clone(&endpoint.processor);
        endpoint
            .pool
            .execute(move || processor.process(request, response));

        let frame = slot
            .wait(self.timeout)
            .ok_or(TransportError::Timeout(self.timeout))?;
        open_frame(frame)
    }

    fn end(self: Box<Self>, _reusable: bool) {}
}

/// One-shot rendezvous between a handler thread and a waiting caller.
#[derive(Default)]
struct ReplySlot {
    frame: Mutex<Option<Bytes>>,
    ready: Condvar,
}

impl ReplySlot {
    fn fill(&self, frame: Bytes) {
        *self.frame.lock() = Some(frame);
        self.ready.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        let mut frame = self.frame.lock();
        while frame.is_none() {
            if self.ready.wait_until(&mut frame, deadline).timed_out() {
                break;
            }
        }
        frame.take()
    }
}
