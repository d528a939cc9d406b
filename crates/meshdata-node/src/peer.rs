//! One process in the mesh.

use meshdata_rpc::RpcService;
use meshdata_shared::SharedDataManager;
use meshdata_transport::{PeerToPeer, TcpTransport};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::config::{ConfigError, NodeConfig, Role};
use crate::error::{NodeError, Result};

/// A running peer: store hosting or replication, plus the service registry.
///
/// A hub peer hosts every store, the naming store included; a member
/// replicates them from `hub_url`. Either kind registers and calls services.
#[derive(Debug)]
pub struct Peer {
    config: NodeConfig,
    manager: SharedDataManager,
    rpc: RpcService,
}

impl Peer {
    /// Starts a peer on a TCP transport.
    pub fn start(config: NodeConfig) -> Result<Self> {
        let transport = Arc::new(TcpTransport::with_config(config.transport()));
        Self::start_with(config, transport)
    }

    /// Starts a peer on `transport`.
    pub fn start_with(config: NodeConfig, transport: Arc<dyn PeerToPeer>) -> Result<Self> {
        config.validate().map_err(ConfigError::from)?;

        let manager = match (config.role, config.hub_url.as_deref()) {
            (Role::Hub, _) => SharedDataManager::hub(Arc::clone(&transport), config.manager())?,
            (Role::Member, Some(hub_url)) => {
                SharedDataManager::member(Arc::clone(&transport), hub_url, config.manager())?
            }
            (Role::Member, None) => return Err(NodeError::MissingHubUrl),
        };
        let rpc = match RpcService::start(transport, &manager, config.rpc()) {
            Ok(rpc) => rpc,
            Err(e) => {
                manager.close();
                return Err(e.into());
            }
        };

        info!(
            name = %config.name,
            role = ?config.role,
            hub_url = %manager.hub_url(),
            rpc_url = %rpc.url(),
            "Peer started"
        );
        Ok(Self {
            config,
            manager,
            rpc,
        })
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Store manager.
    #[must_use]
    pub fn manager(&self) -> &SharedDataManager {
        &self.manager
    }

    /// Service registry.
    #[must_use]
    pub fn rpc(&self) -> &RpcService {
        &self.rpc
    }

    /// Url of the hub this peer hosts or replicates from.
    #[must_use]
    pub fn hub_url(&self) -> &str {
        self.manager.hub_url()
    }

    /// Withdraws this peer's registrations and closes its stores. Idempotent.
    pub fn shutdown(&self) {
        self.rpc.shutdown();
        self.manager.close();
        info!(name = %self.config.name, "Peer stopped");
    }
}
