//! Serializer registry with ordered resolution.

use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::builtin::{
    BoolSerializer, BytesSerializer, EndpointSerializer, I64Serializer, StringSerializer,
    U64Serializer, UnitSerializer,
};
use crate::{CodecError, ErasedSerializer, Result, Serializer, SerializerAccessor, TypeToken};

/// Registered serializers plus fallback accessors.
///
/// Thread-safe; registration and resolution may interleave freely.
#[derive(Default)]
pub struct SerializerRegistry {
    serializers: RwLock<HashMap<TypeId, ErasedSerializer>>,
    accessors: RwLock<Vec<Arc<dyn SerializerAccessor>>>,
}

impl SerializerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry preloaded with the primitive serializers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.add_serializer::<String, _>(StringSerializer);
        registry.add_serializer::<i64, _>(I64Serializer);
        registry.add_serializer::<u64, _>(U64Serializer);
        registry.add_serializer::<bool, _>(BoolSerializer);
        registry.add_serializer::<Vec<u8>, _>(BytesSerializer);
        registry.add_serializer::<(), _>(UnitSerializer);
        registry.add_serializer::<Option<meshdata_types::EndpointId>, _>(EndpointSerializer);
        registry
    }

    /// Registers a serializer for `T`, replacing any previous one.
    pub fn add_serializer<T, S>(&self, serializer: S)
    where
        T: 'static,
        S: Serializer<T> + 'static,
    {
        self.add_erased(ErasedSerializer::new::<T, S>(serializer));
    }

    /// Registers an already erased serializer under its own token.
    pub fn add_erased(&self, serializer: ErasedSerializer) {
        let token = serializer.token();
        debug!(type_name = token.name(), "Registered serializer");
        self.serializers.write().insert(token.id(), serializer);
    }

    /// Registers a fallback accessor. Accessors are queried in registration
    /// order after the registered serializers.
    pub fn add_serializer_accessor(&self, accessor: impl SerializerAccessor + 'static) {
        self.accessors.write().push(Arc::new(accessor));
    }

    /// Returns true if `T` resolves without explicit serializers.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.resolve::<T>(&[]).is_ok()
    }

    /// Resolves the serializer for `T`.
    ///
    /// `explicit` wins over everything registered; accessors are consulted
    /// last.
    pub fn resolve<T: 'static>(
        &self,
        explicit: &[ErasedSerializer],
    ) -> Result<Arc<dyn Serializer<T>>> {
        let token = TypeToken::of::<T>();

        if let Some(found) = explicit.iter().find(|s| s.token() == token) {
            return typed(found, token);
        }

        if let Some(found) = self.serializers.read().get(&token.id()) {
            return typed(found, token);
        }

        let accessors = self.accessors.read().clone();
        for accessor in accessors {
            if let Some(found) = accessor.serializer(&token) {
                debug!(type_name = token.name(), "Serializer resolved by accessor");
                return typed(&found, token);
            }
        }

        Err(CodecError::NoSerializer(token.name()))
    }

    /// Writes `value` with the resolved serializer.
    pub fn encode<T: 'static>(
        &self,
        value: &T,
        buf: &mut bytes::BytesMut,
        explicit: &[ErasedSerializer],
    ) -> Result<()> {
        self.resolve::<T>(explicit)?.write(value, buf)
    }

    /// Reads a `T` with the resolved serializer.
    pub fn decode<T: 'static>(
        &self,
        buf: &mut bytes::Bytes,
        explicit: &[ErasedSerializer],
    ) -> Result<T> {
        self.resolve::<T>(explicit)?.read(buf)
    }
}

fn typed<T: 'static>(
    found: &ErasedSerializer,
    token: TypeToken,
) -> Result<Arc<dyn Serializer<T>>> {
    found.downcast::<T>().ok_or(CodecError::TypeMismatch {
        expected: token.name(),
        found: found.token().name(),
    })
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("serializers", &self.serializers.read().len())
            .field("accessors", &self.accessors.read().len())
            .finish()
    }
}
