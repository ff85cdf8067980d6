//! Callback proxies: local objects presented to the remote runtime.
//!
//! A [`RemoteProxy`] starts Unbound. The first time its remote handle is
//! needed, the runtime allocates a proxy object implementing the declared
//! interface and the proxy keeps a global reference to it for good (Bound).
//!
//! Remote calls on that object land in [`RemoteProxy::invoke`]. `equals`,
//! `hashCode`/`getHashCode` and `toString` are answered here from local
//! state; everything else goes to the [`ProxyHandler`], which may decline by
//! returning `None`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

use crate::error::{BridgeError, Result};
use crate::marshal::{BoxedValue, FromRemote, LocalValue, Marshaller};
use crate::native::{InvocationTarget, RawHandle};
use crate::object::{AsRemoteObject, RemoteObject};
use crate::refs::{GlobalRef, LocalRef};
use crate::registry::{Registry, WeakRegistry};

/// One remote call arriving at a proxy.
pub struct ProxyCall<'a> {
    method: &'a str,
    args: &'a [BoxedValue],
    marshaller: Marshaller,
}

impl<'a> ProxyCall<'a> {
    pub fn method(&self) -> &'a str {
        self.method
    }

    pub fn args(&self) -> &'a [BoxedValue] {
        self.args
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn marshaller(&self) -> &Marshaller {
        &self.marshaller
    }

    /// Unbox argument `index` as `T`.
    pub fn arg<T: FromRemote>(&self, index: usize) -> Result<T> {
        let boxed = self.args.get(index).ok_or_else(|| {
            BridgeError::mismatch(
                format!("argument {index}"),
                format!("{} arguments", self.args.len()),
            )
        })?;
        self.marshaller.unbox_as(boxed)
    }
}

/// Local implementation behind a proxy.
///
/// Every method has a default, so an empty `impl` yields a proxy that only
/// answers the identity methods.
pub trait ProxyHandler: Send + Sync + 'static {
    /// Handle an interface method. `Ok(None)` means "not handled" and is
    /// reported to the remote caller as a null result.
    fn invoke(&self, call: &ProxyCall<'_>) -> Result<Option<LocalValue>> {
        let _ = call;
        Ok(None)
    }

    /// Hash reported to the remote side. Defaults to the bound handle.
    fn hash_code(&self) -> Option<i32> {
        None
    }

    /// Display form reported to the remote side.
    fn display(&self) -> Option<String> {
        None
    }
}

/// Handler for proxies that implement nothing beyond the identity methods.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityOnly;

impl ProxyHandler for IdentityOnly {}

struct ProxyInner {
    registry: Registry,
    interface: String,
    handler: Box<dyn ProxyHandler>,
    bound: OnceLock<Arc<GlobalRef>>,
}

/// A local object exposed to the remote runtime as an implementation of
/// `interface`. Clones share the same remote proxy object.
#[derive(Clone)]
pub struct RemoteProxy {
    inner: Arc<ProxyInner>,
}

impl RemoteProxy {
    pub fn new(
        registry: &Registry,
        interface: impl Into<String>,
        handler: impl ProxyHandler,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                registry: registry.clone(),
                interface: interface.into(),
                handler: Box::new(handler),
                bound: OnceLock::new(),
            }),
        }
    }

    pub fn interface(&self) -> &str {
        &self.inner.interface
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn marshaller(&self) -> Marshaller {
        self.inner.registry.marshaller()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.bound.get().is_some()
    }

    /// The bound global handle, or `NULL` while unbound. Never binds.
    pub fn raw(&self) -> RawHandle {
        self.inner.bound.get().map_or(RawHandle::NULL, |g| g.raw())
    }

    /// A fresh local reference to the remote proxy object, binding first if
    /// needed.
    pub fn remote_handle(&self) -> Result<LocalRef> {
        let global = self.bind()?;
        self.inner.registry.duplicate_local(global.raw())
    }

    fn bind(&self) -> Result<&Arc<GlobalRef>> {
        if let Some(global) = self.inner.bound.get() {
            return Ok(global);
        }

        let registry = &self.inner.registry;
        let target: Arc<dyn InvocationTarget> = Arc::new(ProxyDispatch {
            registry: registry.downgrade(),
            proxy: Arc::downgrade(&self.inner),
        });

        let global = registry.with_scope(|| {
            let local = registry
                .native()
                .create_proxy(&self.inner.interface, target)?;
            registry.acquire_global(local)
        })?;

        if let Err(lost) = self.inner.bound.set(Arc::new(global)) {
            // Another thread bound first; ours is released here
            log::trace!("Discarding proxy handle {} after losing bind race", lost.raw());
        } else {
            log::debug!(
                "Bound proxy for {} to {}",
                self.inner.interface,
                self.raw()
            );
        }

        self.inner
            .bound
            .get()
            .ok_or(BridgeError::InvalidHandle(RawHandle::NULL))
    }

    /// Dispatch a call. Ownership of `args` moves into the call; every
    /// argument is released before this returns, on success, error or panic.
    pub fn invoke(&self, method: &str, args: Vec<BoxedValue>) -> Result<Option<BoxedValue>> {
        let outcome = self.dispatch(method, &args);

        for arg in args {
            arg.release();
        }

        match outcome? {
            Some(value) => self.marshaller().box_value(&value).map(Some),
            None => Ok(None),
        }
    }

    fn dispatch(&self, method: &str, args: &[BoxedValue]) -> Result<Option<LocalValue>> {
        match (method, args) {
            ("equals", [other]) => Ok(Some(LocalValue::Bool(self.is_same_remote(other.raw())?))),
            ("hashCode" | "getHashCode", []) => Ok(Some(LocalValue::I32(self.hash_code()))),
            ("toString", []) => Ok(Some(LocalValue::String(self.display_string()))),
            _ => {
                let call = ProxyCall {
                    method,
                    args,
                    marshaller: self.marshaller(),
                };
                self.inner.handler.invoke(&call)
            }
        }
    }

    /// Whether `other` refers to this proxy's remote object. An unbound
    /// proxy matches nothing.
    pub fn is_same_remote(&self, other: RawHandle) -> Result<bool> {
        let Some(own) = self.inner.bound.get() else {
            return Ok(false);
        };

        if other.is_null() {
            return Ok(false);
        }

        self.inner.registry.native().is_same_object(own.raw(), other)
    }

    pub fn hash_code(&self) -> i32 {
        self.inner
            .handler
            .hash_code()
            .unwrap_or_else(|| self.raw().as_raw() as i32)
    }

    pub fn display_string(&self) -> String {
        self.inner.handler.display().unwrap_or_else(|| {
            format!("{}: {} <local proxy object>", self.inner.interface, self.raw())
        })
    }
}

impl AsRemoteObject for RemoteProxy {
    fn as_remote_object(&self) -> Result<RemoteObject> {
        Ok(RemoteObject::from_shared(self.bind()?.clone()))
    }
}

impl PartialEq for RemoteProxy {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }

        other.inner.bound.get().is_some_and(|theirs| self == &theirs.raw())
    }
}

impl Eq for RemoteProxy {}

impl PartialEq<RawHandle> for RemoteProxy {
    fn eq(&self, other: &RawHandle) -> bool {
        self.is_same_remote(*other).unwrap_or_else(|e| {
            log::warn!("Proxy identity check failed: {}", e);
            false
        })
    }
}

impl Hash for RemoteProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Each bound remote object belongs to exactly one inner
        std::ptr::hash(Arc::as_ptr(&self.inner), state);
    }
}

impl fmt::Display for RemoteProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

impl fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("interface", &self.inner.interface)
            .field("handle", &self.raw())
            .finish()
    }
}

/// The target the runtime calls into. Holds the proxy weakly: the remote
/// object must not keep the local one alive.
struct ProxyDispatch {
    registry: WeakRegistry,
    proxy: Weak<ProxyInner>,
}

impl InvocationTarget for ProxyDispatch {
    fn invoke(&self, method: &str, args: Vec<RawHandle>) -> Result<RawHandle> {
        let Some(registry) = self.registry.upgrade() else {
            log::debug!("Call to `{}` after the registry was dropped", method);
            return Ok(RawHandle::NULL);
        };

        // Take ownership of every argument before anything can fail
        let mut boxed = Vec::with_capacity(args.len());
        let mut adopt_error = None;
        for raw in args {
            if raw.is_null() {
                boxed.push(BoxedValue::null());
                continue;
            }
            match registry.adopt_local(raw) {
                Ok(global) => boxed.push(BoxedValue::from_object(RemoteObject::from_global(global))),
                Err(e) => {
                    adopt_error.get_or_insert(e);
                }
            }
        }

        let Some(inner) = self.proxy.upgrade() else {
            log::debug!("Call to `{}` on a proxy whose local side is gone", method);
            return Ok(RawHandle::NULL);
        };

        if let Some(e) = adopt_error {
            return Err(e);
        }

        let proxy = RemoteProxy { inner };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| proxy.invoke(method, boxed)));

        match outcome {
            Ok(Ok(Some(result))) => Ok(registry.duplicate_local(result.raw())?.raw()),
            Ok(Ok(None)) => Ok(RawHandle::NULL),
            Ok(Err(e)) => Err(e),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::warn!("Proxy handler for `{}` panicked: {}", method, message);
                Err(BridgeError::RemoteException(format!(
                    "proxy handler for `{method}` panicked: {message}"
                )))
            }
        }
    }
}
