//! Registry configuration.

/// Settings for an [`RpcService`](crate::RpcService).
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Process name published alongside each registration.
    pub name: String,
    /// Listener port; `None` picks an ephemeral port.
    pub port: Option<u16>,
    /// Worker threads serving inbound calls.
    pub thread_count: usize,
    /// Decoded [`Shared`](crate::Shared) values kept for identity reuse.
    pub shared_cache_capacity: usize,
    /// Client factories kept open to remote peers; the least recently used
    /// is released when a new peer is called.
    pub max_connections: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            name: "meshdata-rpc".to_string(),
            port: None,
            thread_count: 16,
            shared_cache_capacity: 1024,
            max_connections: 64,
        }
    }
}
