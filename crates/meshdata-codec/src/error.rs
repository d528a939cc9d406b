//! Error types for the codec layer.

use thiserror::Error;

/// Errors raised while resolving or running serializers.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No serializer is known for the type.
    #[error("no serializer for type {0}")]
    NoSerializer(&'static str),

    /// A serializer was registered under a token that does not match its type.
    #[error("serializer type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Requested type.
        expected: &'static str,
        /// Type the serializer was built for.
        found: &'static str,
    },

    /// Wire-level encode or decode failure.
    #[error(transparent)]
    Wire(#[from] meshdata_types::Error),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
