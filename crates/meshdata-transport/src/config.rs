//! Transport configuration.

use std::time::Duration;

/// Settings shared by every transport implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Host advertised in listener urls and bound by TCP listeners.
    pub host: String,
    /// Upper bound on one request/response exchange.
    pub request_timeout: Duration,
    /// Upper bound on establishing a connection.
    pub connect_timeout: Duration,
    /// Idle connections kept per client factory.
    pub max_idle_connections: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            max_idle_connections: 8,
        }
    }
}
