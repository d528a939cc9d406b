//! Error types for the transport layer.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while serving or issuing requests.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The url could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The url names a scheme this transport does not handle.
    #[error("unsupported scheme '{found}', expected '{expected}'")]
    UnsupportedScheme {
        /// Scheme handled by the transport.
        expected: &'static str,
        /// Scheme found in the url.
        found: String,
    },

    /// The requested port is taken.
    #[error("address in use: {0}")]
    AddressInUse(String),

    /// Nothing is listening at the destination.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// The exchange did not finish in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A frame exceeded the size cap.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced frame size.
        size: usize,
        /// Maximum accepted size.
        max: usize,
    },

    /// The server answered with an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// The factory or listener was released.
    #[error("transport closed")]
    Closed,

    /// Invalid transport configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed response frame.
    #[error(transparent)]
    Decode(#[from] meshdata_types::Error),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Returns true for failures that say nothing about the remote side's
    /// state, i.e. the request never reached a handler.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Closed)
    }
}
