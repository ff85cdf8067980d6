//! The native-interface boundary.
//!
//! Everything the bridge knows about the remote runtime goes through
//! [`NativeInterface`]. The trait mirrors the primitives a VM native interface
//! exposes: reference creation/deletion, local frames, class and member lookup,
//! typed calls and field access, string interning and proxy creation.
//!
//! Handles returned by lookup and call primitives are *local* references owned
//! by the current frame of the calling thread unless stated otherwise.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Opaque reference to an object in the remote heap.
///
/// A handle is either local (valid until its frame is popped or it is deleted)
/// or global (valid until deleted). The kind is tracked by the runtime, not
/// by this type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct RawHandle(u64);

impl RawHandle {
    pub const NULL: RawHandle = RawHandle(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

/// Cached identifier of a remote method.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MethodId(u64);

impl MethodId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Cached identifier of a remote field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FieldId(u64);

impl FieldId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// A value as it travels through a call primitive.
///
/// The remote byte type is signed on some runtimes and unsigned on others;
/// `Byte` and `UByte` carry the two representations so the runtime can reject
/// the one it does not speak.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JValue {
    Void,
    Boolean(bool),
    Byte(i8),
    UByte(u8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(RawHandle),
}

impl JValue {
    pub fn kind(&self) -> &'static str {
        match self {
            JValue::Void => "void",
            JValue::Boolean(_) => "boolean",
            JValue::Byte(_) => "byte",
            JValue::UByte(_) => "unsigned byte",
            JValue::Char(_) => "char",
            JValue::Short(_) => "short",
            JValue::Int(_) => "int",
            JValue::Long(_) => "long",
            JValue::Float(_) => "float",
            JValue::Double(_) => "double",
            JValue::Object(_) => "object",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            JValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<RawHandle> {
        match self {
            JValue::Object(h) => Some(*h),
            _ => None,
        }
    }
}

/// Local dispatch target behind a remote proxy object.
///
/// `args` are local references created for this call; the target owns them
/// and must delete them. The returned handle (or `NULL` for "no result") is a
/// local reference in the caller's current frame.
pub trait InvocationTarget: Send + Sync {
    fn invoke(&self, method: &str, args: Vec<RawHandle>) -> Result<RawHandle>;
}

/// Primitive operations offered by the remote runtime.
///
/// Every method except [`attach_current_thread`](Self::attach_current_thread)
/// and [`is_current_thread_attached`](Self::is_current_thread_attached)
/// requires the calling thread to be attached.
pub trait NativeInterface: Send + Sync {
    /// Attach the calling thread. Attaching twice is a no-op.
    fn attach_current_thread(&self) -> Result<()>;

    fn is_current_thread_attached(&self) -> bool;

    // References

    fn new_local_ref(&self, obj: RawHandle) -> Result<RawHandle>;

    fn delete_local_ref(&self, obj: RawHandle) -> Result<()>;

    fn new_global_ref(&self, obj: RawHandle) -> Result<RawHandle>;

    fn delete_global_ref(&self, obj: RawHandle) -> Result<()>;

    fn push_local_frame(&self, capacity: usize) -> Result<()>;

    /// Pop the innermost frame, deleting its locals. A non-null `result` is
    /// re-created as a local in the parent frame and returned.
    fn pop_local_frame(&self, result: RawHandle) -> Result<RawHandle>;

    fn is_same_object(&self, a: RawHandle, b: RawHandle) -> Result<bool>;

    fn is_instance_of(&self, obj: RawHandle, class: RawHandle) -> Result<bool>;

    fn get_object_class(&self, obj: RawHandle) -> Result<RawHandle>;

    // Lookup

    fn find_class(&self, name: &str) -> Result<RawHandle>;

    fn get_method_id(&self, class: RawHandle, name: &str, signature: &str) -> Result<MethodId>;

    fn get_static_method_id(
        &self,
        class: RawHandle,
        name: &str,
        signature: &str,
    ) -> Result<MethodId>;

    fn get_field_id(&self, class: RawHandle, name: &str, signature: &str) -> Result<FieldId>;

    fn get_static_field_id(&self, class: RawHandle, name: &str, signature: &str)
    -> Result<FieldId>;

    // Calls and fields

    fn call_method(&self, obj: RawHandle, method: MethodId, args: &[JValue]) -> Result<JValue>;

    fn call_static_method(
        &self,
        class: RawHandle,
        method: MethodId,
        args: &[JValue],
    ) -> Result<JValue>;

    fn new_object(&self, class: RawHandle, ctor: MethodId, args: &[JValue]) -> Result<RawHandle>;

    fn get_field(&self, obj: RawHandle, field: FieldId) -> Result<JValue>;

    fn set_field(&self, obj: RawHandle, field: FieldId, value: JValue) -> Result<()>;

    fn get_static_field(&self, class: RawHandle, field: FieldId) -> Result<JValue>;

    fn set_static_field(&self, class: RawHandle, field: FieldId, value: JValue) -> Result<()>;

    // Strings

    fn new_string(&self, value: &str) -> Result<RawHandle>;

    fn get_string(&self, obj: RawHandle) -> Result<String>;

    // Proxies

    /// Allocate a remote object implementing `interface` whose calls are
    /// forwarded to `target`.
    fn create_proxy(&self, interface: &str, target: Arc<dyn InvocationTarget>)
    -> Result<RawHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        assert!(RawHandle::NULL.is_null());
        assert!(!RawHandle::from_raw(7).is_null());
        assert_eq!(RawHandle::default(), RawHandle::NULL);
        assert_eq!(RawHandle::NULL.to_string(), "null");
        assert_eq!(format!("{:?}", RawHandle::from_raw(255)), "0xff");
    }

    #[test]
    fn test_jvalue_accessors() {
        assert_eq!(JValue::Boolean(true).as_bool(), Some(true));
        assert_eq!(JValue::Int(3).as_bool(), None);
        assert_eq!(JValue::Int(3).as_int(), Some(3));
        let h = RawHandle::from_raw(9);
        assert_eq!(JValue::Object(h).as_object(), Some(h));
        assert_eq!(JValue::UByte(1).kind(), "unsigned byte");
    }
}
