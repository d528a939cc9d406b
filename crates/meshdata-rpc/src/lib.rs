//! # Meshdata RPC
//!
//! Maps `(service type, key)` pairs to callable implementations and calls
//! them across peers.
//!
//! Registrations are published to the naming store, a shared data store at
//! [`NAMING_PATH`] replicated to every peer. Callers find the hosting url
//! there; addresses are never configured by hand.
//!
//! ```text
//! peer A: rpc.register("calc", "main", def, vec![])   -> naming store
//! peer B: rpc.get_service("calc", "main", vec![])?    <- naming store
//!         .call2::<i64, i64, i64>("add", &1, &2)?      -> peer A
//! ```
//!
//! Arguments and results go through the [`meshdata_codec`] serializer
//! registry. [`Shared`] results keep their identity: calling the same
//! producing method twice yields handles on one allocation until the owner
//! records a new value.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod definition;
mod error;
mod naming;
mod protocol;
mod proxy;
mod service;
mod shared;
mod stats;

pub use config::RpcConfig;
pub use definition::ServiceDef;
pub use error::{Result, RpcError};
pub use naming::{naming_schema, NamingEntry, NAMING_PATH};
pub use proxy::ServiceProxy;
pub use service::RpcService;
pub use shared::Shared;
pub use stats::RpcStats;
