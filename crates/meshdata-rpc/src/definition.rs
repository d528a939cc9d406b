//! Service definitions: named methods with typed arguments.

use bytes::{Bytes, BytesMut};
use meshdata_codec::{ErasedSerializer, SerializerRegistry};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{Result, RpcError};

/// Decoding context for one inbound call.
pub(crate) struct CallArgs<'a> {
    registry: &'a SerializerRegistry,
    explicit: &'a [ErasedSerializer],
    values: std::vec::IntoIter<Bytes>,
}

impl<'a> CallArgs<'a> {
    pub(crate) fn new(
        registry: &'a SerializerRegistry,
        explicit: &'a [ErasedSerializer],
        values: Vec<Bytes>,
    ) -> Self {
        Self {
            registry,
            explicit,
            values: values.into_iter(),
        }
    }

    fn next<T: 'static>(&mut self) -> Result<T> {
        let mut value = self
            .values
            .next()
            .ok_or_else(|| RpcError::BadRequest("missing argument".into()))?;
        Ok(self.registry.decode(&mut value, self.explicit)?)
    }

    fn finish(&self) -> Result<()> {
        match self.values.len() {
            0 => Ok(()),
            extra => Err(RpcError::BadRequest(format!("{extra} unexpected arguments"))),
        }
    }

    fn encode<R: 'static>(&self, result: &R, out: &mut BytesMut) -> Result<()> {
        Ok(self.registry.encode(result, out, self.explicit)?)
    }
}

pub(crate) type Handler =
    Arc<dyn Fn(&mut CallArgs<'_>, &mut BytesMut) -> Result<()> + Send + Sync>;

/// The methods a registered implementation answers.
///
/// Argument and result types are resolved against the registry's
/// serializers, plus any passed at registration.
///
/// ```rust
/// use meshdata_rpc::{RpcError, ServiceDef};
///
/// let calculator = ServiceDef::new()
///     .method2("add", |a: i64, b: i64| Ok(a + b))
///     .method2("div", |a: i64, b: i64| {
///         a.checked_div(b).ok_or_else(|| RpcError::failed("division by zero"))
///     });
/// assert_eq!(calculator.method_names().collect::<Vec<_>>(), ["add", "div"]);
/// ```
#[derive(Clone, Default)]
pub struct ServiceDef {
    methods: BTreeMap<String, Handler>,
}

impl ServiceDef {
    /// Creates a definition with no methods.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method taking no arguments.
    #[must_use]
    pub fn method0<R, F>(self, name: &str, f: F) -> Self
    where
        R: 'static,
        F: Fn() -> Result<R> + Send + Sync + 'static,
    {
        self.with_handler(name, move |args, out| {
            args.finish()?;
            args.encode(&f()?, out)
        })
    }

    /// Adds a method taking one argument.
    #[must_use]
    pub fn method1<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: 'static,
        R: 'static,
        F: Fn(A) -> Result<R> + Send + Sync + 'static,
    {
        self.with_handler(name, move |args, out| {
            let a = args.next::<A>()?;
            args.finish()?;
            args.encode(&f(a)?, out)
        })
    }

    /// Adds a method taking two arguments.
    #[must_use]
    pub fn method2<A, B, R, F>(self, name: &str, f: F) -> Self
    where
        A: 'static,
        B: 'static,
        R: 'static,
        F: Fn(A, B) -> Result<R> + Send + Sync + 'static,
    {
        self.with_handler(name, move |args, out| {
            let a = args.next::<A>()?;
            let b = args.next::<B>()?;
            args.finish()?;
            args.encode(&f(a, b)?, out)
        })
    }

    fn with_handler(
        mut self,
        name: &str,
        handler: impl Fn(&mut CallArgs<'_>, &mut BytesMut) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(name.to_string(), Arc::new(handler));
        self
    }

    /// Method names in sorted order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub(crate) fn handler(&self, name: &str) -> Option<&Handler> {
        self.methods.get(name)
    }
}

impl fmt::Debug for ServiceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDef")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
