//! Error types for the service registry.

use meshdata_codec::CodecError;
use meshdata_shared::SharedDataError;
use meshdata_transport::TransportError;
use std::fmt;
use thiserror::Error;

/// Errors raised by registration, discovery and remote calls.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The key is already registered for the service type.
    #[error("service {service_type}/{key} is already registered")]
    Conflict {
        /// Service type.
        service_type: String,
        /// Registration key.
        key: String,
    },

    /// No service is registered under the key.
    #[error("service not found: {service_type}/{key}")]
    NotFound {
        /// Service type.
        service_type: String,
        /// Registration key.
        key: String,
    },

    /// The service exists but has no such method.
    #[error("service {service_type} has no method {method}")]
    NoSuchMethod {
        /// Service type.
        service_type: String,
        /// Requested method.
        method: String,
    },

    /// The request could not be decoded by the callee.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The remote method returned an error.
    #[error("remote call failed: {0}")]
    Failed(String),

    /// The registry has been shut down.
    #[error("rpc service stopped")]
    Stopped,

    /// Argument or result (de)serialization failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Transport failure; calls are not retried.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Naming store failure.
    #[error(transparent)]
    Shared(#[from] SharedDataError),

    /// Wire decoding failure.
    #[error(transparent)]
    Types(#[from] meshdata_types::Error),
}

/// A specialized Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl RpcError {
    /// An application-level failure raised by a service method.
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }

    /// Returns true for failures to reach the callee.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
