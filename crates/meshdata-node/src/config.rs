//! Node configuration: a YAML file plus `MESHDATA_` environment overrides.
//!
//! ```yaml
//! name: orders-1
//! role: member
//! hub_url: tcp://10.0.0.5:7400
//! rpc_port: 7401
//! thread_count: 8
//! ```
//!
//! Environment overrides are the upper-cased field names behind a
//! `MESHDATA_` prefix, e.g. `MESHDATA_THREAD_COUNT=8`.

use meshdata_rpc::RpcConfig;
use meshdata_shared::{HostConfig, ManagerConfig, ReplicaConfig};
use meshdata_transport::{TransportConfig, TransportUrl};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "MESHDATA";

/// Allowed peer names: alphanumeric start, then alphanumerics, `-`, `_` or `.`.
pub static NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("Invalid regex"));

/// Errors raised while loading node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range or malformed.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),

    /// The configuration could not be rendered as YAML.
    #[error("failed to render configuration: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// What a node does in the mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Hosts the authoritative stores, including the naming store.
    #[default]
    Hub,
    /// Replicates stores from the hub at `hub_url`.
    Member,
}

/// Configuration for one meshdata node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_role"))]
pub struct NodeConfig {
    /// Process name, published with every service registration.
    #[validate(length(min = 1, max = 64), regex(path = *NAME_REGEX))]
    pub name: String,
    /// Hub or member.
    pub role: Role,
    /// Url of the hub; required for members.
    #[validate(custom(function = "validate_hub_url"))]
    pub hub_url: Option<String>,
    /// Host advertised in listener urls.
    #[validate(length(min = 1))]
    pub host: String,
    /// Port the hub serves stores on; ephemeral if unset.
    pub hub_port: Option<u16>,
    /// Port inbound service calls arrive on; ephemeral if unset.
    pub rpc_port: Option<u16>,
    /// Worker threads per listener.
    #[validate(range(min = 1, max = 256))]
    pub thread_count: usize,
    /// Remote call and hub request timeout, in milliseconds.
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,
    /// Time allowed for a store's first synchronization, in milliseconds.
    #[validate(range(min = 1))]
    pub open_timeout_ms: u64,
    /// Long-poll wait at the hub, in milliseconds.
    pub poll_wait_ms: u64,
    /// Change sets a hub keeps per store.
    #[validate(range(min = 1))]
    pub log_capacity: usize,
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON logs.
    pub json_logs: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "meshdata".to_string(),
            role: Role::Hub,
            hub_url: None,
            host: "127.0.0.1".to_string(),
            hub_port: None,
            rpc_port: None,
            thread_count: 16,
            request_timeout_ms: 30_000,
            open_timeout_ms: 10_000,
            poll_wait_ms: 500,
            log_capacity: 1024,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

fn validate_hub_url(url: &str) -> Result<(), ValidationError> {
    let parsed = TransportUrl::parse(url).map_err(|e| {
        let mut err = ValidationError::new("url");
        err.message = Some(e.to_string().into());
        err
    })?;
    if !matches!(parsed.scheme(), "tcp" | "mem") {
        let mut err = ValidationError::new("scheme");
        err.message = Some(format!("unsupported scheme '{}'", parsed.scheme()).into());
        return Err(err);
    }
    Ok(())
}

fn validate_role(config: &NodeConfig) -> Result<(), ValidationError> {
    if config.role == Role::Member && config.hub_url.is_none() {
        let mut err = ValidationError::new("hub_url");
        err.message = Some("members need a hub_url".into());
        return Err(err);
    }
    Ok(())
}

impl NodeConfig {
    /// Loads from `path` (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Loads from `path` (if any), then `env` in place of the process
    /// environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let config: NodeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the effective configuration.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Transport settings.
    #[must_use]
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            host: self.host.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..TransportConfig::default()
        }
    }

    /// Shared data manager settings.
    #[must_use]
    pub fn manager(&self) -> ManagerConfig {
        ManagerConfig {
            name: format!("{}-hub", self.name),
            port: self.hub_port,
            thread_count: self.thread_count,
            open_timeout: Duration::from_millis(self.open_timeout_ms),
            replica: ReplicaConfig {
                poll_wait: Duration::from_millis(self.poll_wait_ms),
                ..ReplicaConfig::default()
            },
            host: HostConfig {
                log_capacity: self.log_capacity,
                ..HostConfig::default()
            },
        }
    }

    /// Service registry settings.
    #[must_use]
    pub fn rpc(&self) -> RpcConfig {
        RpcConfig {
            name: self.name.clone(),
            port: self.rpc_port,
            thread_count: self.thread_count,
            ..RpcConfig::default()
        }
    }
}
