//! Error types for shared data stores.

use meshdata_transport::TransportError;
use meshdata_types::StorePath;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the manager, services and the store host.
#[derive(Debug, Error)]
pub enum SharedDataError {
    /// A store already exists at the path.
    #[error("store already exists: {0}")]
    AlreadyExist(StorePath),

    /// No store exists at the path.
    #[error("store not found: {0}")]
    NotFound(StorePath),

    /// The store exists with a different schema.
    #[error("schema mismatch for store {0}")]
    SchemaMismatch(StorePath),

    /// A mutation was attempted through a read-only repository.
    #[error("repository is read-only")]
    ReadOnly,

    /// The service or manager has been stopped.
    #[error("stopped")]
    Stopped,

    /// A record does not conform to the store schema.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The first synchronization did not finish in time.
    #[error("store {path} not initialized after {timeout:?}")]
    InitTimeout {
        /// Store path.
        path: StorePath,
        /// Time waited.
        timeout: Duration,
    },

    /// The hub answered with something the protocol does not allow here.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The hub reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// Transport failure talking to the hub.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Value type error.
    #[error(transparent)]
    Types(#[from] meshdata_types::Error),

    /// Thread spawn or other local I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol message (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for shared data operations.
pub type Result<T> = std::result::Result<T, SharedDataError>;

impl SharedDataError {
    /// Converts schema validation failures into [`SharedDataError::InvalidRecord`].
    pub(crate) fn from_validation(err: meshdata_types::Error) -> Self {
        match err {
            meshdata_types::Error::InvalidRecord(msg) => Self::InvalidRecord(msg),
            other => Self::Types(other),
        }
    }
}
