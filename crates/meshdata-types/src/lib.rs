//! # Meshdata Types
//!
//! Value types shared by every layer of the meshdata workspace.
//!
//! ## Features
//!
//! - Endpoint identities ([`EndpointId`]) with their nullable wire form
//! - Hierarchical store addresses ([`StorePath`])
//! - The record object model ([`Schema`], [`Record`], [`RecordKey`])
//! - Ordered store diffs ([`ChangeSet`], [`Change`])
//! - Length-prefixed wire helpers ([`wire`])
//!
//! ## Example
//!
//! ```rust
//! use meshdata_types::{FieldKind, Record, Schema, StorePath};
//!
//! let schema = Schema::builder("inventory")
//!     .record("item", |t| {
//!         t.field("sku", FieldKind::Text)
//!             .field("count", FieldKind::Integer)
//!             .unique_key(["sku"])
//!     })
//!     .build()
//!     .unwrap();
//!
//! let item = Record::new("item").with("sku", "A-1").with("count", 3);
//! let key = schema.validate(&item).unwrap();
//! assert_eq!(key.type_name(), "item");
//!
//! let path = StorePath::new("warehouse/inventory").unwrap();
//! assert_eq!(path.element_count(), 2);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod endpoint;
mod error;
mod path;
mod record;
mod schema;
pub mod wire;

pub use change::{Change, ChangeSet};
pub use endpoint::EndpointId;
pub use error::{Error, Result};
pub use path::{StorePath, SEPARATOR};
pub use record::{Record, RecordKey};
pub use schema::{FieldDef, FieldKind, RecordType, RecordTypeBuilder, Schema, SchemaBuilder};
