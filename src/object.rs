//! Wrapper objects: local values that own a remote object.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::descriptor::MethodSig;
use crate::error::{BridgeError, Result};
use crate::marshal::{LocalValue, Shape};
use crate::native::{JValue, RawHandle};
use crate::refs::{GlobalRef, LocalRef};
use crate::registry::Registry;

/// Capability of exposing a remote handle.
///
/// Implemented by [`RemoteObject`] and [`RemoteProxy`](crate::RemoteProxy),
/// and derivable for wrappers that embed one:
///
/// ```ignore
/// #[derive(AsRemoteObject)]
/// struct Activity {
///     #[remote(handle)]
///     inner: RemoteObject,
/// }
/// ```
pub trait AsRemoteObject {
    /// The remote object, sharing the implementor's global handle.
    fn as_remote_object(&self) -> Result<RemoteObject>;

    /// A fresh local reference owned by the caller.
    fn local_handle(&self) -> Result<LocalRef> {
        let object = self.as_remote_object()?;
        object.registry().duplicate_local(object.raw())
    }
}

/// Local owner of one remote object.
///
/// Holds exactly one global reference for its lifetime. Clones share that
/// reference; it is released when the last clone is dropped or disposed.
/// `==`, `Hash` and `Display` delegate to the remote `equals`, `hashCode`
/// and `toString`.
#[derive(Clone)]
pub struct RemoteObject {
    global: Arc<GlobalRef>,
}

impl RemoteObject {
    /// Wrap the object behind `handle` (local or global). The handle itself
    /// is not modified; a new global reference is taken immediately.
    pub fn from_local(registry: &Registry, handle: RawHandle) -> Result<Self> {
        Ok(Self::from_global(registry.acquire_global(handle)?))
    }

    /// Like [`from_local`](Self::from_local), then deletes `local`.
    pub fn adopt_local(registry: &Registry, local: RawHandle) -> Result<Self> {
        Ok(Self::from_global(registry.adopt_local(local)?))
    }

    pub fn from_global(global: GlobalRef) -> Self {
        Self {
            global: Arc::new(global),
        }
    }

    pub(crate) fn from_shared(global: Arc<GlobalRef>) -> Self {
        Self { global }
    }

    /// Construct a new remote instance of `class` via the constructor
    /// matching `signature`.
    pub fn new_instance(
        registry: &Registry,
        class: &str,
        signature: &str,
        args: &[LocalValue],
    ) -> Result<Self> {
        let native = registry.native();
        let sig = MethodSig::parse(signature)?;
        let marshaller = registry.marshaller();

        registry.with_scope(|| {
            let class_ref = native.find_class(class)?;
            let ctor = native.get_method_id(class_ref, "<init>", signature)?;
            let (jargs, _keepalive) = marshaller.marshal_args(&sig, args)?;
            let local = native.new_object(class_ref, ctor, &jargs)?;
            Self::from_local(registry, local)
        })
    }

    pub fn registry(&self) -> &Registry {
        self.global.registry()
    }

    /// The owned global handle. Valid while `self` is alive.
    pub fn raw(&self) -> RawHandle {
        self.global.raw()
    }

    /// Give up this wrapper's share of the global reference.
    pub fn dispose(self) {
        drop(self);
    }

    /// Remote identity comparison, ignoring `equals` overrides.
    pub fn is_same_object(&self, other: &RemoteObject) -> Result<bool> {
        self.registry().native().is_same_object(self.raw(), other.raw())
    }

    /// Call the remote `equals` with `other` as argument.
    pub fn try_equals(&self, other: &RemoteObject) -> Result<bool> {
        self.equals_raw(other.raw())
    }

    pub fn equals_raw(&self, other: RawHandle) -> Result<bool> {
        let registry = self.registry();
        let methods = registry.object_methods();

        // The argument local must not outlive the comparison
        registry.with_scope(|| {
            let arg = registry.duplicate_local(other)?;
            registry.call_boolean_method(self.raw(), methods.equals, &[JValue::Object(arg.raw())])
        })
    }

    pub fn hash_code(&self) -> Result<i32> {
        let registry = self.registry();
        registry.call_int_method(self.raw(), registry.object_methods().hash_code, &[])
    }

    pub fn to_remote_string(&self) -> Result<String> {
        let registry = self.registry();
        registry
            .call_string_method(self.raw(), registry.object_methods().to_string, &[])?
            .ok_or_else(|| BridgeError::mismatch("string", "null"))
    }

    /// Call an instance method by name and descriptor.
    ///
    /// Arguments are marshalled per parameter type (primitives passed
    /// directly, references boxed); the result is unmarshalled per return type.
    /// Object results come back as [`LocalValue::Object`].
    pub fn invoke_method(
        &self,
        name: &str,
        signature: &str,
        args: &[LocalValue],
    ) -> Result<LocalValue> {
        let registry = self.registry();
        let native = registry.native();
        let sig = MethodSig::parse(signature)?;
        let marshaller = registry.marshaller();

        registry.with_scope(|| {
            let class = native.get_object_class(self.raw())?;
            let method = native.get_method_id(class, name, signature)?;
            let (jargs, _keepalive) = marshaller.marshal_args(&sig, args)?;
            let result = native.call_method(self.raw(), method, &jargs)?;
            marshaller.unmarshal_return(&sig.ret, result)
        })
    }

    /// Read an instance field by name and descriptor.
    pub fn get_field(&self, name: &str, signature: &str) -> Result<LocalValue> {
        let registry = self.registry();
        let native = registry.native();
        let sig = crate::descriptor::TypeSig::parse(signature)?;
        let marshaller = registry.marshaller();

        registry.with_scope(|| {
            let class = native.get_object_class(self.raw())?;
            let field = native.get_field_id(class, name, signature)?;
            let value = native.get_field(self.raw(), field)?;
            marshaller.unmarshal_return(&sig, value)
        })
    }

    /// Write an instance field by name and descriptor.
    pub fn set_field(&self, name: &str, signature: &str, value: &LocalValue) -> Result<()> {
        let registry = self.registry();
        let native = registry.native();
        let sig = crate::descriptor::TypeSig::parse(signature)?;
        let marshaller = registry.marshaller();

        registry.with_scope(|| {
            let class = native.get_object_class(self.raw())?;
            let field = native.get_field_id(class, name, signature)?;
            let (jvalue, _keepalive) = marshaller.marshal_arg(&sig, value)?;
            native.set_field(self.raw(), field, jvalue)
        })
    }

    /// Unbox this object as the given local shape.
    pub fn unbox(&self, shape: Shape) -> Result<LocalValue> {
        self.registry().marshaller().unbox_raw(self.raw(), shape)
    }
}

impl AsRemoteObject for RemoteObject {
    fn as_remote_object(&self) -> Result<RemoteObject> {
        Ok(self.clone())
    }
}

impl PartialEq for RemoteObject {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.global, &other.global) {
            return true;
        }

        self.try_equals(other).unwrap_or_else(|e| {
            log::warn!("Remote equals failed for {}: {}", self.raw(), e);
            false
        })
    }
}

// Relies on the remote `equals` being an equivalence relation.
impl Eq for RemoteObject {}

impl Hash for RemoteObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let code = self.hash_code().unwrap_or_else(|e| {
            log::warn!("Remote hashCode failed for {}: {}", self.raw(), e);
            0
        });
        state.write_i32(code);
    }
}

impl fmt::Display for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_remote_string() {
            Ok(s) => f.write_str(&s),
            Err(e) => write!(f, "<remote object {}: {}>", self.raw(), e),
        }
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteObject").field(&self.raw()).finish()
    }
}
