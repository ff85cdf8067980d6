//! Reference Registry: creation, duplication and release of remote handles.
//!
//! A [`Registry`] is created once per remote runtime. Creation attaches the
//! calling thread and caches the method identifiers every wrapper delegates
//! to; that state is immutable afterwards and shared by every clone.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::marshal::{BoxingTable, Marshaller};
use crate::native::{JValue, MethodId, NativeInterface, RawHandle};
use crate::refs::{DeferredReleaseQueue, FrameGuard, GlobalRef, LocalRef, run_in_frame};

/// Cached identifiers for the root object class.
#[derive(Debug, Clone, Copy)]
pub struct ObjectMethods {
    /// Global reference to the root class; lives as long as the registry.
    pub class: RawHandle,
    pub equals: MethodId,
    pub hash_code: MethodId,
    pub to_string: MethodId,
}

impl ObjectMethods {
    fn load(native: &dyn NativeInterface, class_name: &str) -> Result<Self> {
        let local = native.find_class(class_name)?;
        let class = native.new_global_ref(local)?;
        if let Err(e) = native.delete_local_ref(local) {
            log::warn!("Failed to delete local class reference {}: {}", local, e);
        }

        let lookup = || -> Result<Self> {
            Ok(Self {
                class,
                equals: native.get_method_id(class, "equals", "(Ljava/lang/Object;)Z")?,
                hash_code: native.get_method_id(class, "hashCode", "()I")?,
                to_string: native.get_method_id(class, "toString", "()Ljava/lang/String;")?,
            })
        };

        lookup().inspect_err(|_| release_quietly(native, class))
    }
}

struct RegistryInner {
    native: Arc<dyn NativeInterface>,
    config: BridgeConfig,
    object_methods: ObjectMethods,
    boxing: BoxingTable,
    deferred: DeferredReleaseQueue,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        // Nothing can drain the queue after this, so the dropping thread
        // attaches if it has to
        if !self.native.is_current_thread_attached() {
            if let Err(e) = self.native.attach_current_thread() {
                log::warn!(
                    "Registry dropped on a thread that cannot attach; {} handles stay pinned: {}",
                    self.deferred.len(),
                    e
                );
                return;
            }
            log::debug!("Attached dropping thread to release registry handles");
        }

        let native = self.native.as_ref();
        for raw in self.deferred.drain() {
            release_quietly(native, raw);
        }

        for class in std::iter::once(self.object_methods.class).chain(self.boxing.classes()) {
            release_quietly(native, class);
        }
    }
}

/// Delete a global handle, logging instead of failing.
pub(crate) fn release_quietly(native: &dyn NativeInterface, raw: RawHandle) {
    if let Err(e) = native.delete_global_ref(raw) {
        log::warn!("Failed to release global reference {}: {}", raw, e);
    }
}

/// Shared entry point to one remote runtime. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Attach the calling thread and run the one-time initialization.
    pub fn new(native: Arc<dyn NativeInterface>, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        native.attach_current_thread()?;

        let (object_methods, boxing) = run_in_frame(native.as_ref(), config.scope_capacity, || {
            let object_methods = ObjectMethods::load(native.as_ref(), &config.object_class)?;
            let boxing = BoxingTable::load(native.as_ref())
                .inspect_err(|_| release_quietly(native.as_ref(), object_methods.class))?;
            Ok((object_methods, boxing))
        })?;

        log::debug!(
            "Registry initialized (root class {}, byte signedness {:?})",
            config.object_class,
            config.remote_byte_signedness
        );

        Ok(Self {
            inner: Arc::new(RegistryInner {
                native,
                config,
                object_methods,
                boxing,
                deferred: DeferredReleaseQueue::new(),
            }),
        })
    }

    pub fn native(&self) -> &dyn NativeInterface {
        self.inner.native.as_ref()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn object_methods(&self) -> &ObjectMethods {
        &self.inner.object_methods
    }

    pub(crate) fn boxing(&self) -> &BoxingTable {
        &self.inner.boxing
    }

    pub fn marshaller(&self) -> Marshaller {
        Marshaller::new(self.clone())
    }

    /// A handle that does not keep the runtime alive.
    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether two registries share the same initialization.
    pub fn ptr_eq(&self, other: &Registry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // Threads

    /// Attach the calling thread. Idempotent.
    ///
    /// Also releases handles whose owners were dropped on unattached threads.
    pub fn attach_current_thread(&self) -> Result<()> {
        self.native().attach_current_thread()?;
        self.flush_deferred();
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.native().is_current_thread_attached()
    }

    /// Number of global handles waiting for an attached thread.
    pub fn pending_releases(&self) -> u64 {
        self.inner.deferred.len()
    }

    fn flush_deferred(&self) {
        if !self.inner.deferred.has_pending() || !self.is_attached() {
            return;
        }

        for raw in self.inner.deferred.drain() {
            self.delete_global_quietly(raw);
        }
    }

    // Handles

    /// Create a new global reference to the object behind `handle`.
    ///
    /// `handle` may be local or global and is left untouched.
    pub fn acquire_global(&self, handle: RawHandle) -> Result<GlobalRef> {
        self.flush_deferred();

        if handle.is_null() {
            return Err(BridgeError::InvalidHandle(handle));
        }

        let raw = self.native().new_global_ref(handle)?;
        if raw.is_null() {
            return Err(BridgeError::InvalidHandle(handle));
        }

        Ok(GlobalRef::from_raw(self.clone(), raw))
    }

    /// Create a global reference from a local one, then delete the local.
    pub fn adopt_local(&self, local: RawHandle) -> Result<GlobalRef> {
        let global = self.acquire_global(local);
        self.delete_local(LocalRef::new(local));
        global
    }

    /// Release a global reference. Releasing twice is a no-op.
    pub fn release(&self, global: &GlobalRef) {
        let raw = global.take();
        self.release_raw(raw);
    }

    /// Release a raw global handle. Never fails; null is ignored.
    pub(crate) fn release_raw(&self, raw: RawHandle) {
        if raw.is_null() {
            return;
        }

        if !self.is_attached() {
            self.inner.deferred.defer(raw);
            return;
        }

        self.delete_global_quietly(raw);
    }

    fn delete_global_quietly(&self, raw: RawHandle) {
        release_quietly(self.native(), raw);
    }

    /// A fresh local reference in the current frame, owned by the caller.
    pub fn duplicate_local(&self, handle: RawHandle) -> Result<LocalRef> {
        if handle.is_null() {
            return Ok(LocalRef::NULL);
        }

        let raw = self.native().new_local_ref(handle)?;
        if raw.is_null() {
            return Err(BridgeError::InvalidHandle(handle));
        }

        Ok(LocalRef::new(raw))
    }

    /// Delete a local reference early. Never fails.
    pub fn delete_local(&self, local: LocalRef) {
        if local.is_null() {
            return;
        }

        if let Err(e) = self.native().delete_local_ref(local.raw()) {
            log::warn!("Failed to delete local reference {}: {}", local.raw(), e);
        }
    }

    /// Run `body` in a bounded frame; every local created inside is released
    /// on exit, whether `body` succeeds, fails or panics. Scopes nest.
    pub fn with_scope<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        self.flush_deferred();
        run_in_frame(self.native(), self.config().scope_capacity, body)
    }

    /// Like [`with_scope`](Self::with_scope), but the returned local survives
    /// as a fresh local in the enclosing frame.
    pub fn with_scope_returning(&self, body: impl FnOnce() -> Result<LocalRef>) -> Result<LocalRef> {
        self.flush_deferred();
        let frame = FrameGuard::push(self.native(), self.config().scope_capacity)?;
        let result = body()?;
        let promoted = frame.pop_with(result.raw())?;
        Ok(LocalRef::new(promoted))
    }

    // Typed calls

    pub fn call_void_method(&self, obj: RawHandle, method: MethodId, args: &[JValue]) -> Result<()> {
        match self.native().call_method(obj, method, args)? {
            JValue::Void => Ok(()),
            other => Err(BridgeError::mismatch("void", other.kind())),
        }
    }

    pub fn call_boolean_method(
        &self,
        obj: RawHandle,
        method: MethodId,
        args: &[JValue],
    ) -> Result<bool> {
        let value = self.native().call_method(obj, method, args)?;
        value
            .as_bool()
            .ok_or_else(|| BridgeError::mismatch("boolean", value.kind()))
    }

    pub fn call_int_method(&self, obj: RawHandle, method: MethodId, args: &[JValue]) -> Result<i32> {
        let value = self.native().call_method(obj, method, args)?;
        value
            .as_int()
            .ok_or_else(|| BridgeError::mismatch("int", value.kind()))
    }

    /// The result is a local in the current frame.
    pub fn call_object_method(
        &self,
        obj: RawHandle,
        method: MethodId,
        args: &[JValue],
    ) -> Result<LocalRef> {
        let value = self.native().call_method(obj, method, args)?;
        value
            .as_object()
            .map(LocalRef::new)
            .ok_or_else(|| BridgeError::mismatch("object", value.kind()))
    }

    /// Call a string-returning method; the intermediate local is released.
    pub fn call_string_method(
        &self,
        obj: RawHandle,
        method: MethodId,
        args: &[JValue],
    ) -> Result<Option<String>> {
        self.with_scope(|| {
            let result = self.call_object_method(obj, method, args)?;
            if result.is_null() {
                return Ok(None);
            }
            self.native().get_string(result.raw()).map(Some)
        })
    }
}

/// Non-owning counterpart of [`Registry`], held by objects that live inside
/// the remote runtime and must not keep it alive.
#[derive(Clone)]
pub struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<Registry> {
        self.inner.upgrade().map(|inner| Registry { inner })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.inner.config)
            .field("object_methods", &self.inner.object_methods)
            .field("pending_releases", &self.pending_releases())
            .finish()
    }
}
