//! Identity-preserving values returned by remote calls.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use lru::LruCache;
use meshdata_codec::Serializer;
use meshdata_types::wire;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;
use uuid::Uuid;

type Hook<V> = Arc<dyn Fn(&V) + Send + Sync>;

struct SharedState<V> {
    id: Uuid,
    current: RwLock<(u64, Arc<V>)>,
    hooks: Mutex<Vec<Hook<V>>>,
}

/// A value with a stable identity across remote calls.
///
/// The owner returns the same `Shared` from a method as often as it likes.
/// Callers decoding the same id and version get back the same handle, so
/// repeated calls share one allocation until the owner records a new value.
pub struct Shared<V> {
    state: Arc<SharedState<V>>,
}

impl<V> Shared<V> {
    /// Wraps `value` under a fresh id at version 1.
    pub fn new(value: V) -> Self {
        Self::restore(Uuid::new_v4(), 1, Arc::new(value))
    }

    fn restore(id: Uuid, version: u64, value: Arc<V>) -> Self {
        Self {
            state: Arc::new(SharedState {
                id,
                current: RwLock::new((version, value)),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Identity shared by every copy of this value.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Incremented each time a new value is recorded.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.current.read().0
    }

    /// The current value.
    #[must_use]
    pub fn get(&self) -> Arc<V> {
        Arc::clone(&self.state.current.read().1)
    }

    /// Records a new value and runs the post-save hooks. Returns the new
    /// version. Only this holder's copy changes; remote holders see the new
    /// value the next time it crosses the wire.
    pub fn set(&self, value: V) -> u64 {
        let value = Arc::new(value);
        let version = {
            let mut current = self.state.current.write();
            current.0 += 1;
            current.1 = Arc::clone(&value);
            current.0
        };
        let hooks = self.state.hooks.lock().clone();
        for hook in hooks {
            hook(&value);
        }
        version
    }

    /// Runs `hook` after every value recorded through [`set`](Self::set).
    pub fn post_save(&self, hook: impl Fn(&V) + Send + Sync + 'static) {
        self.state.hooks.lock().push(Arc::new(hook));
    }

    /// Returns true if both handles refer to the same shared value.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl<V> Clone for Shared<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Shared<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.state.current.read();
        f.debug_struct("Shared")
            .field("id", &self.state.id)
            .field("version", &current.0)
            .field("value", &current.1)
            .finish()
    }
}

pub(crate) type SharedCache = Arc<Mutex<LruCache<(Uuid, u64), Arc<dyn Any + Send + Sync>>>>;

pub(crate) fn shared_cache(capacity: usize) -> SharedCache {
    let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
    Arc::new(Mutex::new(LruCache::new(capacity)))
}

/// Writes `[16-byte id][u64 version][json value]`; reads back through a
/// cache keyed by id and version.
pub(crate) struct SharedSerializer<V> {
    cache: SharedCache,
    _value: PhantomData<fn() -> V>,
}

impl<V> SharedSerializer<V> {
    pub(crate) fn new(cache: SharedCache) -> Self {
        Self {
            cache,
            _value: PhantomData,
        }
    }
}

impl<V> Serializer<Shared<V>> for SharedSerializer<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn write(&self, value: &Shared<V>, buf: &mut BytesMut) -> meshdata_codec::Result<()> {
        let (version, current) = {
            let current = value.state.current.read();
            (current.0, Arc::clone(&current.1))
        };
        buf.put_slice(value.id().as_bytes());
        buf.put_u64(version);
        wire::put_json(buf, current.as_ref())?;
        Ok(())
    }

    fn read(&self, buf: &mut Bytes) -> meshdata_codec::Result<Shared<V>> {
        if buf.remaining() < 16 {
            return Err(meshdata_types::Error::truncated("shared id").into());
        }
        let mut id = [0u8; 16];
        buf.copy_to_slice(&mut id);
        let id = Uuid::from_bytes(id);
        let version = wire::get_u64(buf, "shared version")?;
        let value: V = wire::get_json(buf)?;

        let mut cache = self.cache.lock();
        if let Some(cached) = cache
            .get(&(id, version))
            .and_then(|hit| Arc::clone(hit).downcast::<Shared<V>>().ok())
        {
            return Ok(Shared::clone(&cached));
        }
        let shared = Shared::restore(id, version, Arc::new(value));
        cache.put((id, version), Arc::new(shared.clone()));
        Ok(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn encode(serializer: &SharedSerializer<Vec<String>>, value: &Shared<Vec<String>>) -> Bytes {
        let mut buf = BytesMut::new();
        serializer.write(value, &mut buf).unwrap();
        buf.freeze()
    }

    #[test]
    fn same_version_decodes_to_the_same_allocation() {
        let serializer = SharedSerializer::new(shared_cache(8));
        let original = Shared::new(vec!["a".to_string()]);

        let first = serializer.read(&mut encode(&serializer, &original)).unwrap();
        let second = serializer.read(&mut encode(&serializer, &original)).unwrap();
        assert!(first.same_as(&second));
        assert!(Arc::ptr_eq(&first.get(), &second.get()));
        assert_eq!(first.id(), original.id());

        original.set(vec!["b".to_string()]);
        let third = serializer.read(&mut encode(&serializer, &original)).unwrap();
        assert!(!third.same_as(&first));
        assert_eq!(third.version(), 2);
        assert_eq!(*third.get(), vec!["b".to_string()]);
    }

    #[test]
    fn post_save_runs_after_each_set() {
        let shared = Shared::new(1_u32);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        shared.post_save(move |v| {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
        });
        shared.set(2);
        shared.set(3);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(*shared.get(), 3);
    }

    #[test]
    fn short_input_is_rejected() {
        let serializer = SharedSerializer::<u32>::new(shared_cache(1));
        let mut buf = Bytes::from_static(&[0; 4]);
        assert!(serializer.read(&mut buf).is_err());
    }
}
