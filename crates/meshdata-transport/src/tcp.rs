//! TCP transport.
//!
//! Every message travels as one frame:
//!
//! ```text
//! [4-byte length, u32 big-endian] [payload]
//! ```
//!
//! Response payloads start with a status byte (0 ok, 1 error). Servers run a
//! tokio accept loop and hand each request to the worker pool; clients use
//! blocking sockets with pooled idle connections.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::server::open_frame;
use crate::{
    ClientRequest, ClientRequestFactory, Exchange, PeerToPeer, Result, ServerListener,
    ServerRequestProcessor, ServerResponseBuilder, TransportConfig, TransportError, TransportUrl,
    WorkerPool,
};

const SCHEME: &str = "tcp";

/// Largest accepted frame (64 MiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Transport over TCP sockets.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TransportConfig,
}

impl TcpTransport {
    /// Creates a transport with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport with explicit settings.
    #[must_use]
    pub fn with_config(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl PeerToPeer for TcpTransport {
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
        let bind_port = port.unwrap_or(0);
        let listener = std::net::TcpListener::bind((self.config.host.as_str(), bind_port))
            .map_err(|e| match e.kind() {
                io::ErrorKind::AddrInUse => {
                    TransportError::AddressInUse(format!("{}:{bind_port}", self.config.host))
                }
                _ => TransportError::Io(e),
            })?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        let url = TransportUrl::new(SCHEME, &self.config.host, port);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let listener_name = name.to_string();
        pool.handle()
            .spawn(accept_loop(listener, processor, stop_rx, listener_name));

        Ok(ServerListener::new(url.to_string(), name, port, pool, move || {
            let _ = stop_tx.send(());
        }))
    }

    fn client_request_factory(&self, url: &str) -> Result<Arc<dyn ClientRequestFactory>> {
        let parsed = TransportUrl::parse_with_scheme(url, SCHEME)?;
        Ok(Arc::new(TcpClientFactory {
            url: url.to_string(),
            connections: Arc::new(ConnectionPool {
                authority: parsed.authority(),
                config: self.config.clone(),
                idle: Mutex::new(VecDeque::new()),
                released: AtomicBool::new(false),
            }),
        }))
    }
}

async fn accept_loop(
    listener: std::net::TcpListener,
    processor: Arc<dyn ServerRequestProcessor>,
    mut stop: oneshot::Receiver<()>,
    name: String,
) {
    let listener = match tokio::net::TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            warn!(name = %name, error = %e, "Failed to register listener with runtime");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(name = %name, peer = %peer, "Connection accepted");
                    tokio::spawn(serve_connection(stream, Arc::clone(&processor)));
                }
                Err(e) => warn!(name = %name, error = %e, "Accept failed"),
            },
        }
    }
    debug!(name = %name, "Accept loop finished");
}

/// Serves requests on one connection until the peer closes it.
async fn serve_connection(
    mut stream: tokio::net::TcpStream,
    processor: Arc<dyn ServerRequestProcessor>,
) {
    loop {
        let request = match read_frame_async(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "Dropping connection after read failure");
                return;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let response = ServerResponseBuilder::new(move |frame| {
            let _ = reply_tx.send(frame);
        });
        let processor = Arc::clone(&processor);
        tokio::task::spawn_blocking(move || processor.process(request, response));

        let Ok(frame) = reply_rx.await else {
            return;
        };
        if let Err(e) = write_frame_async(&mut stream, &frame).await {
            debug!(error = %e, "Dropping connection after write failure");
            return;
        }
    }
}

async fn read_frame_async(stream: &mut tokio::net::TcpStream) -> Result<Option<Bytes>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = checked_len(len_buf)?;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(Some(Bytes::from(buf)))
}

async fn write_frame_async(stream: &mut tokio::net::TcpStream, payload: &[u8]) -> Result<()> {
    let len = frame_len(payload)?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

fn checked_len(len_buf: [u8; 4]) -> Result<usize> {
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(len)
}

fn frame_len(payload: &[u8]) -> Result<u32> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    // MAX_FRAME_SIZE fits in u32
    Ok(payload.len() as u32)
}

struct TcpClientFactory {
    url: String,
    connections: Arc<ConnectionPool>,
}

impl ClientRequestFactory for TcpClientFactory {
    fn url(&self) -> &str {
        &self.url
    }

    fn create_request(&self) -> Result<ClientRequest> {
        if self.connections.released.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(ClientRequest::new(Box::new(TcpExchange {
            connections: Arc::clone(&self.connections),
            stream: None,
        })))
    }

    fn release(&self) {
        self.connections.release();
    }
}

/// Idle client connections to one destination.
struct ConnectionPool {
    authority: String,
    config: TransportConfig,
    idle: Mutex<VecDeque<TcpStream>>,
    released: AtomicBool,
}

impl ConnectionPool {
    fn acquire(&self) -> Result<TcpStream> {
        while let Some(stream) = self.idle.lock().pop_front() {
            if is_alive(&stream) {
                return Ok(stream);
            }
            debug!(authority = %self.authority, "Discarding stale pooled connection");
        }
        self.connect()
    }

    fn connect(&self) -> Result<TcpStream> {
        let addrs = self
            .authority
            .to_socket_addrs()
            .map_err(|e| TransportError::Unreachable(format!("{}: {e}", self.authority)))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.config.request_timeout))?;
                    stream.set_write_timeout(Some(self.config.request_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(TransportError::Unreachable(format!(
            "{}: {}",
            self.authority,
            last_err.map_or_else(|| "no address".to_string(), |e| e.to_string())
        )))
    }

    fn give_back(&self, stream: TcpStream) {
        if self.released.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_idle_connections {
            idle.push_back(stream);
        }
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            let closed = self.idle.lock().drain(..).count();
            debug!(authority = %self.authority, closed, "Released tcp client connections");
        }
    }
}

/// A pooled connection is usable if the peer has not closed it and no stray
/// bytes are waiting.
fn is_alive(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut peeked = [0u8; 1];
    let alive = matches!(stream.peek(&mut peeked), Err(e) if e.kind() == io::ErrorKind::WouldBlock);
    alive && stream.set_nonblocking(false).is_ok()
}

struct TcpExchange {
    connections: Arc<ConnectionPool>,
    stream: Option<TcpStream>,
}

impl TcpExchange {
    fn map_io(&self, e: io::Error) -> TransportError {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                TransportError::Timeout(self.connections.config.request_timeout)
            }
            io::ErrorKind::ConnectionRefused => {
                TransportError::Unreachable(self.connections.authority.clone())
            }
            _ => TransportError::Io(e),
        }
    }
}

impl Exchange for TcpExchange {
    fn round_trip(&mut self, request: Bytes) -> Result<Bytes> {
        let mut stream = self.connections.acquire()?;

        let len = frame_len(&request)?;
        stream
            .write_all(&len.to_be_bytes())
            .and_then(|()| stream.write_all(&request))
            .and_then(|()| stream.flush())
            .map_err(|e| self.map_io(e))?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).map_err(|e| self.map_io(e))?;
        let len = checked_len(len_buf)?;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).map_err(|e| self.map_io(e))?;

        self.stream = Some(stream);
        open_frame(Bytes::from(buf))
    }

    fn end(self: Box<Self>, reusable: bool) {
        let this = *self;
        if let (true, Some(stream)) = (reusable, this.stream) {
            this.connections.give_back(stream);
        }
    }
}
