//! Manager configuration.

use std::time::Duration;

/// Settings for a [`SharedDataManager`](crate::SharedDataManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Name given to the manager's transport listener.
    pub name: String,
    /// Listener port for a hub; `None` picks an ephemeral port.
    pub port: Option<u16>,
    /// Worker threads serving hub requests.
    pub thread_count: usize,
    /// How long `get_shared_data_service_sync` waits for the first sync.
    pub open_timeout: Duration,
    /// Replica behaviour for member managers.
    pub replica: ReplicaConfig,
    /// Store hosting behaviour for hub managers.
    pub host: HostConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "meshdata".to_string(),
            port: None,
            thread_count: 16,
            open_timeout: Duration::from_secs(10),
            replica: ReplicaConfig::default(),
            host: HostConfig::default(),
        }
    }
}

/// Settings for replicas kept by member managers.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// How long one poll may wait at the hub for new change sets.
    pub poll_wait: Duration,
    /// Delay before retrying after the hub becomes unreachable.
    pub retry_backoff: Duration,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Settings for stores hosted by a hub.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Change sets retained per store for pollers that fall behind.
    pub log_capacity: usize,
    /// Upper bound on a single poll wait, whatever the replica asks for.
    pub max_poll_wait: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_capacity: 1024,
            max_poll_wait: Duration::from_secs(5),
        }
    }
}
