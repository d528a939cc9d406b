//! Client side of one request/response exchange.

use bytes::{Bytes, BytesMut};
use std::fmt;

use crate::Result;

/// Moves one request to the server and back. Implemented by each transport.
pub trait Exchange: Send {
    /// Sends the complete request and waits for the complete response
    /// payload.
    fn round_trip(&mut self, request: Bytes) -> Result<Bytes>;

    /// Releases the exchange. `reusable` is false when the underlying
    /// connection may be in an unknown state.
    fn end(self: Box<Self>, reusable: bool);
}

/// A request being written.
pub struct ClientRequest {
    body: BytesMut,
    exchange: Option<Box<dyn Exchange>>,
}

impl ClientRequest {
    /// Wraps a transport exchange.
    #[must_use]
    pub fn new(exchange: Box<dyn Exchange>) -> Self {
        Self {
            body: BytesMut::new(),
            exchange: Some(exchange),
        }
    }

    /// The request payload under construction.
    pub fn request_stream(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    /// Sends the request and waits for the response.
    ///
    /// On failure the exchange is already ended.
    pub fn request_complete(mut self) -> Result<PendingResponse> {
        let Some(mut exchange) = self.exchange.take() else {
            return Err(crate::TransportError::Closed);
        };
        let body = self.body.split().freeze();
        match exchange.round_trip(body) {
            Ok(response) => Ok(PendingResponse {
                response,
                exchange: Some(exchange),
            }),
            Err(e) => {
                exchange.end(false);
                Err(e)
            }
        }
    }
}

impl Drop for ClientRequest {
    fn drop(&mut self) {
        if let Some(exchange) = self.exchange.take() {
            exchange.end(true);
        }
    }
}

impl fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRequest")
            .field("len", &self.body.len())
            .finish()
    }
}

/// A received response waiting to be read and ended.
pub struct PendingResponse {
    response: Bytes,
    exchange: Option<Box<dyn Exchange>>,
}

impl PendingResponse {
    /// The response payload. Reads consume it from the front.
    pub fn response_stream(&mut self) -> &mut Bytes {
        &mut self.response
    }

    /// Releases the exchange.
    pub fn end(mut self) {
        if let Some(exchange) = self.exchange.take() {
            exchange.end(true);
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(exchange) = self.exchange.take() {
            exchange.end(true);
        }
    }
}

impl fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("remaining", &self.response.len())
            .finish()
    }
}
