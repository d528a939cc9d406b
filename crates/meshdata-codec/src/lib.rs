//! # Meshdata Codec
//!
//! Per-type serializers that move domain values on and off the transport
//! byte stream.
//!
//! ## Resolution
//!
//! [`SerializerRegistry::resolve`] walks an explicit chain:
//!
//! 1. serializers passed with the call,
//! 2. serializers registered with [`SerializerRegistry::add_serializer`],
//! 3. accessors registered with [`SerializerRegistry::add_serializer_accessor`],
//!    queried in registration order,
//!
//! and fails with [`CodecError::NoSerializer`] when nothing matches.
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use meshdata_codec::SerializerRegistry;
//!
//! let registry = SerializerRegistry::with_defaults();
//! let codec = registry.resolve::<String>(&[]).unwrap();
//!
//! let mut buf = BytesMut::new();
//! codec.write(&"hello".to_string(), &mut buf).unwrap();
//! let value = codec.read(&mut buf.freeze()).unwrap();
//! assert_eq!(value, "hello");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builtin;
mod error;
mod registry;
mod serializer;

pub use builtin::{
    BoolSerializer, BytesSerializer, EndpointSerializer, I64Serializer, JsonSerializer,
    SerdeModule, StringSerializer, U64Serializer, UnitSerializer,
};
pub use error::{CodecError, Result};
pub use registry::SerializerRegistry;
pub use serializer::{ErasedSerializer, Serializer, SerializerAccessor, TypeToken};
