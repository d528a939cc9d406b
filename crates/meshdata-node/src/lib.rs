//! # Meshdata Node
//!
//! Runs one peer of a meshdata mesh: a hub hosting the shared data stores,
//! or a member replicating them, each with a service registry on top.
//!
//! ```text
//!   member ──poll/commit──▶ hub ◀──poll/commit── member
//!      │                     │                     │
//!      └────── naming store (meshdata/naming) ─────┘
//!      └──────────── direct service calls ─────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use meshdata_node::{NodeConfig, Peer};
//!
//! let peer = Peer::start(NodeConfig::default()).unwrap();
//! println!("hub at {}", peer.hub_url());
//! peer.shutdown();
//! ```
//!
//! ## Modules
//!
//! - [`config`] - YAML and environment configuration with validation
//! - [`observability`] - Structured logging
//! - [`peer`] - The running peer

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod error;
pub mod observability;
pub mod peer;

pub use config::{ConfigError, NodeConfig, Role};
pub use error::{NodeError, Result};
pub use peer::Peer;
