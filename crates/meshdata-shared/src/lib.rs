//! # Meshdata Shared
//!
//! Replicated, path-addressed stores of typed records.
//!
//! One peer runs a hub [`SharedDataManager`] holding the authoritative
//! stores; other peers run member managers that keep replicas of the stores
//! they open. Every [`SharedDataService`] offers the same surface either way:
//!
//! - transactional [`read`](SharedDataService::read) and
//!   [`write`](SharedDataService::write) through a [`Repository`]
//! - an ordered change stream delivered to [`ChangeListener`]s from one
//!   thread per store
//! - [`wait_for_initialization`](SharedDataService::wait_for_initialization)
//!   for late joiners
//!
//! Replicas that lose track of the hub (restart, truncated change log,
//! transport failure) reload a full snapshot, deliver `reset()` to their
//! listeners and take a new store id.
//!
//! ## Example
//!
//! ```rust
//! use meshdata_shared::{ManagerConfig, Repository, Result, SharedDataManager};
//! use meshdata_transport::MemoryTransport;
//! use meshdata_types::{FieldKind, Record, Schema, StorePath};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(MemoryTransport::new());
//! let hub = SharedDataManager::hub(transport, ManagerConfig::default()).unwrap();
//!
//! let schema = Schema::builder("inventory")
//!     .record("item", |t| t.field("sku", FieldKind::Text).unique_key(["sku"]))
//!     .build()
//!     .unwrap();
//! let path = StorePath::new("warehouse/items").unwrap();
//! let items = hub.get_shared_data_service_sync(&path, &schema).unwrap();
//!
//! items
//!     .write(&mut |repo: &mut Repository<'_>| -> Result<()> {
//!         repo.put(Record::new("item").with("sku", "A-1"))?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let mut count = 0;
//! items
//!     .read(&mut |repo: &mut Repository<'_>| -> Result<()> {
//!         count = repo.len();
//!         Ok(())
//!     })
//!     .unwrap();
//! assert_eq!(count, 1);
//! hub.close();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod host;
mod latch;
mod listener;
mod manager;
mod protocol;
mod replica;
mod repository;
mod service;
mod stats;
mod store;

pub use config::{HostConfig, ManagerConfig, ReplicaConfig};
pub use error::{Result, SharedDataError};
pub use listener::{ChangeListener, ListenerId};
pub use manager::SharedDataManager;
pub use repository::{Repository, SharedData};
pub use service::SharedDataService;
pub use stats::SharedDataStats;
pub use store::{Operation, RecordSet};
