//! Serializers for primitive and serde-backed types.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use meshdata_types::{wire, EndpointId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::{ErasedSerializer, Result, Serializer, SerializerAccessor, TypeToken};

/// `u16` length-prefixed UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer<String> for StringSerializer {
    fn write(&self, value: &String, buf: &mut BytesMut) -> Result<()> {
        Ok(wire::put_str(buf, value)?)
    }

    fn read(&self, buf: &mut Bytes) -> Result<String> {
        Ok(wire::get_str(buf)?)
    }
}

/// Big-endian `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Serializer;

impl Serializer<i64> for I64Serializer {
    fn write(&self, value: &i64, buf: &mut BytesMut) -> Result<()> {
        buf.put_i64(*value);
        Ok(())
    }

    fn read(&self, buf: &mut Bytes) -> Result<i64> {
        Ok(wire::get_u64(buf, "i64")? as i64)
    }
}

/// Big-endian `u64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Serializer;

impl Serializer<u64> for U64Serializer {
    fn write(&self, value: &u64, buf: &mut BytesMut) -> Result<()> {
        buf.put_u64(*value);
        Ok(())
    }

    fn read(&self, buf: &mut Bytes) -> Result<u64> {
        Ok(wire::get_u64(buf, "u64")?)
    }
}

/// One byte, 0 or 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolSerializer;

impl Serializer<bool> for BoolSerializer {
    fn write(&self, value: &bool, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(u8::from(*value));
        Ok(())
    }

    fn read(&self, buf: &mut Bytes) -> Result<bool> {
        match wire::get_u8(buf, "bool")? {
            0 => Ok(false),
            1 => Ok(true),
            other => {
                Err(meshdata_types::Error::Decode(format!("invalid bool byte: {other}")).into())
            }
        }
    }
}

/// `u32` length-prefixed raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Vec<u8>> for BytesSerializer {
    fn write(&self, value: &Vec<u8>, buf: &mut BytesMut) -> Result<()> {
        Ok(wire::put_blob(buf, value)?)
    }

    fn read(&self, buf: &mut Bytes) -> Result<Vec<u8>> {
        Ok(wire::get_blob(buf)?.to_vec())
    }
}

/// Writes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitSerializer;

impl Serializer<()> for UnitSerializer {
    fn write(&self, _value: &(), _buf: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    fn read(&self, _buf: &mut Bytes) -> Result<()> {
        Ok(())
    }
}

/// Nullable endpoint identity in its flag-prefixed form.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointSerializer;

impl Serializer<Option<EndpointId>> for EndpointSerializer {
    fn write(&self, value: &Option<EndpointId>, buf: &mut BytesMut) -> Result<()> {
        Ok(EndpointId::encode(value.as_ref(), buf)?)
    }

    fn read(&self, buf: &mut Bytes) -> Result<Option<EndpointId>> {
        Ok(EndpointId::decode(buf)?)
    }
}

/// Any serde type as a `u32` length-prefixed JSON document.
pub struct JsonSerializer<T>(PhantomData<fn() -> T>);

impl<T> JsonSerializer<T> {
    /// Creates a JSON serializer for `T`.
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonSerializer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsonSerializer<{}>", std::any::type_name::<T>())
    }
}

impl<T> Serializer<T> for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned,
{
    fn write(&self, value: &T, buf: &mut BytesMut) -> Result<()> {
        Ok(wire::put_json(buf, value)?)
    }

    fn read(&self, buf: &mut Bytes) -> Result<T> {
        Ok(wire::get_json(buf)?)
    }
}

/// Accessor that hands out [`JsonSerializer`]s for the serde types it was
/// told about.
///
/// ```rust
/// use meshdata_codec::{SerdeModule, SerializerRegistry};
///
/// let registry = SerializerRegistry::new();
/// registry.add_serializer_accessor(SerdeModule::new().with::<Vec<String>>());
/// assert!(registry.resolve::<Vec<String>>(&[]).is_ok());
/// ```
#[derive(Default)]
pub struct SerdeModule {
    factories: HashMap<TypeId, fn() -> ErasedSerializer>,
}

impl SerdeModule {
    /// Creates an empty module.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `T` to the module.
    #[must_use]
    pub fn with<T>(mut self) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        self.factories.insert(TypeId::of::<T>(), || {
            ErasedSerializer::new::<T, _>(JsonSerializer::<T>::new())
        });
        self
    }
}

impl SerializerAccessor for SerdeModule {
    fn serializer(&self, token: &TypeToken) -> Option<ErasedSerializer> {
        self.factories.get(&token.id()).map(|make| make())
    }
}
