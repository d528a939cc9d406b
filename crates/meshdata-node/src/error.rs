//! Error types for running a node.

use meshdata_rpc::RpcError;
use meshdata_shared::SharedDataError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while starting or running a peer.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Hosting or connecting to shared data stores failed.
    #[error(transparent)]
    Shared(#[from] SharedDataError),

    /// A member was configured without a hub to replicate from.
    #[error("members need a hub_url")]
    MissingHubUrl,

    /// The service registry could not start.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// A specialized Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
