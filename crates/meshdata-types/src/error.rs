//! Error types for meshdata value types.

use thiserror::Error;

/// Errors raised while building or decoding value types.
#[derive(Debug, Error)]
pub enum Error {
    /// The store path is malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The schema definition is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A record does not conform to its schema.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A wire payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for value type operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a decode error for a truncated field.
    #[must_use]
    pub fn truncated(field: &str) -> Self {
        Self::Decode(format!("truncated {field}"))
    }
}
