//! The serializer contract and its type-erased form.

use bytes::{Bytes, BytesMut};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::Result;

/// Converts values of `T` to and from a byte stream.
///
/// Implementations must be symmetric: reading what `write` produced yields a
/// value equal to the original.
pub trait Serializer<T>: Send + Sync {
    /// Appends `value` to `buf`.
    fn write(&self, value: &T, buf: &mut BytesMut) -> Result<()>;

    /// Consumes one value from the front of `buf`.
    fn read(&self, buf: &mut Bytes) -> Result<T>;
}

/// Identifies a Rust type without reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeToken {
    id: TypeId,
    name: &'static str,
}

impl TypeToken {
    /// Returns the token for `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the type id.
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Returns the type name, for diagnostics only.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if this token names `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A serializer with its value type erased, so serializers for different
/// types can travel in one list.
#[derive(Clone)]
pub struct ErasedSerializer {
    token: TypeToken,
    inner: Arc<dyn Any + Send + Sync>,
}

impl ErasedSerializer {
    /// Erases a concrete serializer.
    pub fn new<T, S>(serializer: S) -> Self
    where
        T: 'static,
        S: Serializer<T> + 'static,
    {
        Self::from_arc::<T>(Arc::new(serializer))
    }

    /// Erases an already shared serializer.
    #[must_use]
    pub fn from_arc<T: 'static>(serializer: Arc<dyn Serializer<T>>) -> Self {
        Self {
            token: TypeToken::of::<T>(),
            inner: Arc::new(serializer),
        }
    }

    /// Returns the token of the value type.
    #[must_use]
    pub fn token(&self) -> TypeToken {
        self.token
    }

    /// Recovers the typed serializer, or `None` if it serializes another type.
    #[must_use]
    pub fn downcast<T: 'static>(&self) -> Option<Arc<dyn Serializer<T>>> {
        self.inner
            .downcast_ref::<Arc<dyn Serializer<T>>>()
            .cloned()
    }
}

impl fmt::Debug for ErasedSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedSerializer")
            .field("type", &self.token.name)
            .finish()
    }
}

/// Fallback resolver queried by type token after explicit and registered
/// serializers.
pub trait SerializerAccessor: Send + Sync {
    /// Returns a serializer for `token`, if this accessor knows one.
    fn serializer(&self, token: &TypeToken) -> Option<ErasedSerializer>;
}

impl<F> SerializerAccessor for F
where
    F: Fn(&TypeToken) -> Option<ErasedSerializer> + Send + Sync,
{
    fn serializer(&self, token: &TypeToken) -> Option<ErasedSerializer> {
        self(token)
    }
}
