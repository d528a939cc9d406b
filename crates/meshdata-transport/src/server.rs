//! Server side: response builders and listener handles.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use meshdata_types::wire;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{Result, TransportError, WorkerPool};

const STATUS_OK: u8 = 0;
const STATUS_ERROR: u8 = 1;

type Reply = Box<dyn FnOnce(Bytes) + Send>;

/// Collects one response and hands it back to the transport.
pub struct ServerResponseBuilder {
    body: BytesMut,
    reply: Option<Reply>,
}

impl ServerResponseBuilder {
    /// Creates a builder whose completed frame is passed to `reply`.
    pub(crate) fn new(reply: impl FnOnce(Bytes) + Send + 'static) -> Self {
        Self {
            body: BytesMut::new(),
            reply: Some(Box::new(reply)),
        }
    }

    /// The response payload under construction.
    pub fn response_stream(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    /// Sends the response.
    pub fn complete(mut self) {
        let payload = self.body.split().freeze();
        self.send(STATUS_OK, &payload);
    }

    /// Discards anything written and answers with an error.
    pub fn fail(mut self, message: impl fmt::Display) {
        let message = message.to_string();
        self.send(STATUS_ERROR, message.as_bytes());
    }

    fn send(&mut self, status: u8, payload: &[u8]) {
        if let Some(reply) = self.reply.take() {
            reply(frame(status, payload));
        }
    }
}

impl Drop for ServerResponseBuilder {
    fn drop(&mut self) {
        if self.reply.is_some() {
            warn!("Request handler dropped its response without completing it");
            self.send(STATUS_ERROR, b"request was not completed by its handler");
        }
    }
}

impl fmt::Debug for ServerResponseBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerResponseBuilder")
            .field("len", &self.body.len())
            .field("completed", &self.reply.is_none())
            .finish()
    }
}

fn frame(status: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(status);
    buf.put_slice(payload);
    buf.freeze()
}

/// Splits a response frame into its payload or the remote error.
pub(crate) fn open_frame(mut frame: Bytes) -> Result<Bytes> {
    match wire::get_u8(&mut frame, "response status")? {
        STATUS_OK => Ok(frame),
        STATUS_ERROR => Err(TransportError::Remote(
            String::from_utf8_lossy(frame.chunk()).into_owned(),
        )),
        other => Err(meshdata_types::Error::Decode(format!(
            "invalid response status: {other}"
        ))
        .into()),
    }
}

/// A running listener. Stopping is idempotent and also happens on drop.
pub struct ServerListener {
    url: String,
    name: String,
    port: u16,
    pool: Arc<WorkerPool>,
    on_stop: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ServerListener {
    pub(crate) fn new(
        url: String,
        name: &str,
        port: u16,
        pool: Arc<WorkerPool>,
        on_stop: impl FnOnce() + Send + 'static,
    ) -> Self {
        info!(url = %url, name = %name, "Server listener started");
        Self {
            url,
            name: name.to_string(),
            port,
            pool,
            on_stop: Mutex::new(Some(Box::new(on_stop))),
        }
    }

    /// Url clients use to reach this listener.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Listener name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns false once stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.on_stop.lock().is_some()
    }

    /// Stops accepting requests and shuts the worker pool down.
    pub fn stop(&self) {
        let Some(on_stop) = self.on_stop.lock().take() else {
            return;
        };
        on_stop();
        self.pool.shutdown();
        info!(url = %self.url, name = %self.name, "Server listener stopped");
    }
}

impl Drop for ServerListener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ServerListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerListener")
            .field("url", &self.url)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn builder() -> (ServerResponseBuilder, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel();
        let builder = ServerResponseBuilder::new(move |frame| {
            let _ = tx.send(frame);
        });
        (builder, rx)
    }

    #[test]
    fn complete_sends_payload() {
        let (mut response, rx) = builder();
        response.response_stream().extend_from_slice(b"pong");
        response.complete();
        let payload = open_frame(rx.recv().unwrap()).unwrap();
        assert_eq!(payload.as_ref(), b"pong");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fail_sends_remote_error() {
        let (mut response, rx) = builder();
        response.response_stream().extend_from_slice(b"partial");
        response.fail("boom");
        let err = open_frame(rx.recv().unwrap()).unwrap_err();
        assert!(matches!(err, TransportError::Remote(msg) if msg == "boom"));
    }

    #[test]
    fn dropped_builder_answers_with_error() {
        let (response, rx) = builder();
        drop(response);
        assert!(matches!(
            open_frame(rx.recv().unwrap()),
            Err(TransportError::Remote(_))
        ));
        assert!(rx.try_recv().is_err());
    }
}
