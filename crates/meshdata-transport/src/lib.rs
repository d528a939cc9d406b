//! # Meshdata Transport
//!
//! Request/response channels between peers, independent of any RPC
//! semantics.
//!
//! ## Lifecycle
//!
//! A client exchange moves through three handles, each consuming the last:
//!
//! ```text
//! ClientRequestFactory::create_request() -> ClientRequest
//!     request_stream() ... request_complete() -> PendingResponse
//!     response_stream() ... end()
//! ```
//!
//! Writing after completion, reading before it, or ending twice cannot be
//! expressed. Dropping a handle early ends the exchange exactly once.
//!
//! On the server, a [`ServerRequestProcessor`] receives each request with a
//! [`ServerResponseBuilder`] and completes it once. A builder dropped without
//! completion answers the caller with an error.
//!
//! ## Implementations
//!
//! - [`MemoryTransport`]: `mem://host:port`, in-process
//! - [`TcpTransport`]: `tcp://host:port`, `[u32 BE length][payload]` frames

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod memory;
mod pool;
mod request;
mod server;
mod tcp;
mod url;

pub use config::TransportConfig;
pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use pool::WorkerPool;
pub use request::{ClientRequest, Exchange, PendingResponse};
pub use server::{ServerListener, ServerResponseBuilder};
pub use tcp::{TcpTransport, MAX_FRAME_SIZE};
pub use url::TransportUrl;

use bytes::Bytes;
use std::sync::Arc;

/// A transport capable of serving and issuing requests.
pub trait PeerToPeer: Send + Sync {
    /// Url scheme this transport handles, e.g. `tcp`.
    fn scheme(&self) -> &'static str;

    /// Starts a listener on `port` (or an ephemeral port) whose requests are
    /// processed by a pool of `thread_count` workers.
    fn create_server_listener(
        &self,
        port: Option<u16>,
        thread_count: usize,
        processor: Arc<dyn ServerRequestProcessor>,
        name: &str,
    ) -> Result<ServerListener>;

    /// Returns a reusable request factory bound to `url`.
    fn client_request_factory(&self, url: &str) -> Result<Arc<dyn ClientRequestFactory>>;
}

/// Creates requests to one destination.
pub trait ClientRequestFactory: Send + Sync {
    /// Destination url.
    fn url(&self) -> &str;

    /// Starts a new exchange.
    fn create_request(&self) -> Result<ClientRequest>;

    /// Tears down pooled resources. Later requests fail with
    /// [`TransportError::Closed`].
    fn release(&self);
}

/// Handles inbound requests.
pub trait ServerRequestProcessor: Send + Sync {
    /// Processes one request. `response` must be completed exactly once;
    /// consuming it enforces that.
    fn process(&self, request: Bytes, response: ServerResponseBuilder);
}

impl<F> ServerRequestProcessor for F
where
    F: Fn(Bytes, ServerResponseBuilder) + Send + Sync,
{
    fn process(&self, request: Bytes, response: ServerResponseBuilder) {
        self(request, response)
    }
}

/// Issues one request on a fresh exchange and returns the full response.
///
/// Convenience wrapper over the three-step lifecycle.
pub fn call(factory: &dyn ClientRequestFactory, request: &[u8]) -> Result<Bytes> {
    let mut exchange = factory.create_request()?;
    exchange.request_stream().extend_from_slice(request);
    let mut pending = exchange.request_complete()?;
    let response = pending.response_stream().clone();
    pending.end();
    Ok(response)
}
