//! Value Marshaller: local values ⇄ remote boxed objects.
//!
//! Boxing goes through the remote box classes (`valueOf` to box,
//! `xxxValue` to unbox) whose identifiers are cached once per registry in a
//! [`BoxingTable`]. The one-byte integer is the only representation that
//! depends on configuration: both local `i8` and `u8` are carried as the same
//! eight bits and presented to the remote runtime in whichever form
//! [`BridgeConfig::remote_byte_signedness`](crate::BridgeConfig) declares.

use std::any::Any;
use std::fmt;

use crate::config::Signedness;
use crate::descriptor::{MethodSig, TypeSig};
use crate::error::{BridgeError, Result};
use crate::native::{JValue, MethodId, NativeInterface, RawHandle};
use crate::object::{AsRemoteObject, RemoteObject};
use crate::proxy::RemoteProxy;
use crate::registry::{Registry, release_quietly};

const STRING_CLASS: &str = "java/lang/String";

/// A local value that can cross the boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalValue {
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    Object(RemoteObject),
}

impl LocalValue {
    /// The shape this value unboxes back into, if it has one.
    pub fn shape(&self) -> Option<Shape> {
        Some(match self {
            LocalValue::Null => return None,
            LocalValue::Bool(_) => Shape::Bool,
            LocalValue::I8(_) => Shape::I8,
            LocalValue::U8(_) => Shape::U8,
            LocalValue::I16(_) => Shape::I16,
            LocalValue::I32(_) => Shape::I32,
            LocalValue::I64(_) => Shape::I64,
            LocalValue::F32(_) => Shape::F32,
            LocalValue::F64(_) => Shape::F64,
            LocalValue::Char(_) => Shape::Char,
            LocalValue::String(_) => Shape::String,
            LocalValue::Object(_) => Shape::Object,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.shape().map_or("null", Shape::name)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, LocalValue::Null)
    }
}

macro_rules! local_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for LocalValue {
                fn from(value: $ty) -> Self {
                    LocalValue::$variant(value)
                }
            }
        )*
    };
}

local_value_from! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    char => Char,
    String => String,
    RemoteObject => Object,
}

impl From<&str> for LocalValue {
    fn from(value: &str) -> Self {
        LocalValue::String(value.to_string())
    }
}

impl<T: Into<LocalValue>> From<Option<T>> for LocalValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(LocalValue::Null, Into::into)
    }
}

/// Statically known local type to unbox into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    Bool,
    I8,
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Char,
    String,
    Object,
}

impl Shape {
    pub fn name(self) -> &'static str {
        match self {
            Shape::Bool => "bool",
            Shape::I8 => "i8",
            Shape::U8 => "u8",
            Shape::I16 => "i16",
            Shape::I32 => "i32",
            Shape::I64 => "i64",
            Shape::F32 => "f32",
            Shape::F64 => "f64",
            Shape::Char => "char",
            Shape::String => "string",
            Shape::Object => "object",
        }
    }

    fn box_kind(self) -> Option<BoxKind> {
        Some(match self {
            Shape::Bool => BoxKind::Boolean,
            Shape::I8 | Shape::U8 => BoxKind::Byte,
            Shape::I16 => BoxKind::Short,
            Shape::I32 => BoxKind::Int,
            Shape::I64 => BoxKind::Long,
            Shape::F32 => BoxKind::Float,
            Shape::F64 => BoxKind::Double,
            Shape::Char => BoxKind::Char,
            Shape::String | Shape::Object => return None,
        })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum BoxKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl BoxKind {
    const ALL: [BoxKind; 8] = [
        BoxKind::Boolean,
        BoxKind::Byte,
        BoxKind::Char,
        BoxKind::Short,
        BoxKind::Int,
        BoxKind::Long,
        BoxKind::Float,
        BoxKind::Double,
    ];

    fn class_name(self) -> &'static str {
        match self {
            BoxKind::Boolean => "java/lang/Boolean",
            BoxKind::Byte => "java/lang/Byte",
            BoxKind::Char => "java/lang/Character",
            BoxKind::Short => "java/lang/Short",
            BoxKind::Int => "java/lang/Integer",
            BoxKind::Long => "java/lang/Long",
            BoxKind::Float => "java/lang/Float",
            BoxKind::Double => "java/lang/Double",
        }
    }

    fn descriptor(self) -> char {
        match self {
            BoxKind::Boolean => 'Z',
            BoxKind::Byte => 'B',
            BoxKind::Char => 'C',
            BoxKind::Short => 'S',
            BoxKind::Int => 'I',
            BoxKind::Long => 'J',
            BoxKind::Float => 'F',
            BoxKind::Double => 'D',
        }
    }

    fn unbox_method(self) -> &'static str {
        match self {
            BoxKind::Boolean => "booleanValue",
            BoxKind::Byte => "byteValue",
            BoxKind::Char => "charValue",
            BoxKind::Short => "shortValue",
            BoxKind::Int => "intValue",
            BoxKind::Long => "longValue",
            BoxKind::Float => "floatValue",
            BoxKind::Double => "doubleValue",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BoxEntry {
    class: RawHandle,
    value_of: MethodId,
    unbox: MethodId,
}

/// Cached box classes and their boxing/unboxing methods.
#[derive(Debug)]
pub(crate) struct BoxingTable {
    entries: [BoxEntry; 8],
    string_class: RawHandle,
}

impl BoxingTable {
    /// Look up every box class. Must run inside a local frame; on failure the
    /// globals created so far are released.
    pub(crate) fn load(native: &dyn NativeInterface) -> Result<Self> {
        let mut pinned = Vec::with_capacity(BoxKind::ALL.len() + 1);

        let result = Self::load_into(native, &mut pinned);
        if result.is_err() {
            for class in pinned {
                release_quietly(native, class);
            }
        }
        result
    }

    fn load_into(native: &dyn NativeInterface, pinned: &mut Vec<RawHandle>) -> Result<Self> {
        let mut pin = |name: &str| -> Result<RawHandle> {
            let local = native.find_class(name)?;
            let global = native.new_global_ref(local)?;
            pinned.push(global);
            Ok(global)
        };

        let string_class = pin(STRING_CLASS)?;

        let mut entries = Vec::with_capacity(BoxKind::ALL.len());
        for kind in BoxKind::ALL {
            let class = pin(kind.class_name())?;
            let d = kind.descriptor();
            entries.push(BoxEntry {
                class,
                value_of: native.get_static_method_id(
                    class,
                    "valueOf",
                    &format!("({d})L{};", kind.class_name()),
                )?,
                unbox: native.get_method_id(class, kind.unbox_method(), &format!("(){d}"))?,
            });
        }

        let entries: [BoxEntry; 8] = entries
            .try_into()
            .map_err(|_| BridgeError::RemoteException("incomplete boxing table".into()))?;

        Ok(Self {
            entries,
            string_class,
        })
    }

    fn entry(&self, kind: BoxKind) -> &BoxEntry {
        &self.entries[kind as usize]
    }

    pub(crate) fn classes(&self) -> impl Iterator<Item = RawHandle> + '_ {
        std::iter::once(self.string_class).chain(self.entries.iter().map(|e| e.class))
    }
}

/// A boxed remote value, or null. Owns its reference; released on drop.
#[derive(Clone, Debug, Default)]
pub struct BoxedValue {
    object: Option<RemoteObject>,
}

impl BoxedValue {
    pub fn null() -> Self {
        Self { object: None }
    }

    pub(crate) fn from_object(object: RemoteObject) -> Self {
        Self {
            object: Some(object),
        }
    }

    pub fn is_null(&self) -> bool {
        self.object.is_none()
    }

    /// The underlying global handle, or `NULL`.
    pub fn raw(&self) -> RawHandle {
        self.object.as_ref().map_or(RawHandle::NULL, RemoteObject::raw)
    }

    pub fn as_object(&self) -> Option<&RemoteObject> {
        self.object.as_ref()
    }

    pub fn into_object(self) -> Option<RemoteObject> {
        self.object
    }

    /// Drop this box's share of the remote reference now.
    pub fn release(self) {
        drop(self);
    }
}

/// Converts values between local and remote representations.
#[derive(Clone, Debug)]
pub struct Marshaller {
    registry: Registry,
}

impl Marshaller {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn signedness(&self) -> Signedness {
        self.registry.config().remote_byte_signedness
    }

    fn native(&self) -> &dyn NativeInterface {
        self.registry.native()
    }

    // Boxing

    /// Box a local value. Null yields a null box; wrapper objects yield the
    /// remote object they already own.
    pub fn box_value(&self, value: &LocalValue) -> Result<BoxedValue> {
        match value {
            LocalValue::Null => Ok(BoxedValue::null()),
            LocalValue::Object(object) => Ok(BoxedValue::from_object(object.clone())),
            LocalValue::String(s) => self.registry.with_scope(|| {
                let local = self.native().new_string(s)?;
                Ok(BoxedValue::from_object(RemoteObject::from_local(
                    &self.registry,
                    local,
                )?))
            }),
            primitive => {
                let (kind, slot) = self.primitive_slot(primitive)?;
                let entry = *self.registry.boxing().entry(kind);

                self.registry.with_scope(|| {
                    let boxed = self
                        .native()
                        .call_static_method(entry.class, entry.value_of, &[slot])?;
                    let local = boxed
                        .as_object()
                        .ok_or_else(|| BridgeError::mismatch("object", boxed.kind()))?;
                    if local.is_null() {
                        return Err(BridgeError::RemoteException(format!(
                            "{}.valueOf returned null",
                            kind.class_name()
                        )));
                    }
                    Ok(BoxedValue::from_object(RemoteObject::from_local(
                        &self.registry,
                        local,
                    )?))
                })
            }
        }
    }

    /// Box a value of any type. Types without a remote representation are
    /// rejected with [`BridgeError::UnsupportedMarshalType`].
    pub fn box_any<T: Any>(&self, value: &T) -> Result<BoxedValue> {
        let any = value as &dyn Any;

        macro_rules! boxed_as {
            ($($ty:ty),* $(,)?) => {
                $(
                    if let Some(v) = any.downcast_ref::<$ty>() {
                        return self.box_value(&LocalValue::from(v.clone()));
                    }
                )*
            };
        }

        if let Some(v) = any.downcast_ref::<LocalValue>() {
            return self.box_value(v);
        }
        if let Some(v) = any.downcast_ref::<BoxedValue>() {
            return Ok(v.clone());
        }
        if let Some(v) = any.downcast_ref::<RemoteProxy>() {
            return Ok(BoxedValue::from_object(v.as_remote_object()?));
        }
        if let Some(v) = any.downcast_ref::<&'static str>() {
            return self.box_value(&LocalValue::from(*v));
        }

        boxed_as!(bool, i8, u8, i16, i32, i64, f32, f64, char, String, RemoteObject);

        Err(BridgeError::UnsupportedMarshalType(
            std::any::type_name::<T>().to_string(),
        ))
    }

    fn primitive_slot(&self, value: &LocalValue) -> Result<(BoxKind, JValue)> {
        Ok(match value {
            LocalValue::Bool(b) => (BoxKind::Boolean, JValue::Boolean(*b)),
            LocalValue::I8(v) => (BoxKind::Byte, self.encode_byte(*v as u8)),
            LocalValue::U8(v) => (BoxKind::Byte, self.encode_byte(*v)),
            LocalValue::I16(v) => (BoxKind::Short, JValue::Short(*v)),
            LocalValue::I32(v) => (BoxKind::Int, JValue::Int(*v)),
            LocalValue::I64(v) => (BoxKind::Long, JValue::Long(*v)),
            LocalValue::F32(v) => (BoxKind::Float, JValue::Float(*v)),
            LocalValue::F64(v) => (BoxKind::Double, JValue::Double(*v)),
            LocalValue::Char(c) => {
                let unit = u16::try_from(u32::from(*c)).map_err(|_| {
                    BridgeError::UnsupportedMarshalType(format!(
                        "char {c:?} outside the 16-bit remote char range"
                    ))
                })?;
                (BoxKind::Char, JValue::Char(unit))
            }
            other => {
                return Err(BridgeError::mismatch("primitive", other.type_name()));
            }
        })
    }

    // Byte codec

    /// Present eight bits as the remote runtime's byte.
    pub fn encode_byte(&self, bits: u8) -> JValue {
        match self.signedness() {
            Signedness::Signed => JValue::Byte(bits as i8),
            Signedness::Unsigned => JValue::UByte(bits),
        }
    }

    /// Recover the eight bits of a remote byte.
    pub fn decode_byte(&self, value: JValue) -> Result<u8> {
        match (self.signedness(), value) {
            (Signedness::Signed, JValue::Byte(b)) => Ok(b as u8),
            (Signedness::Unsigned, JValue::UByte(b)) => Ok(b),
            (signedness, other) => Err(BridgeError::mismatch(
                format!("{signedness:?} byte").to_lowercase(),
                other.kind(),
            )),
        }
    }

    // Unboxing

    pub fn unbox(&self, boxed: &BoxedValue, shape: Shape) -> Result<LocalValue> {
        self.unbox_raw(boxed.raw(), shape)
    }

    pub fn unbox_as<T: FromRemote>(&self, boxed: &BoxedValue) -> Result<T> {
        if boxed.is_null() {
            return T::from_local_value(LocalValue::Null);
        }
        T::from_local_value(self.unbox(boxed, T::SHAPE)?)
    }

    /// Unbox any handle (local or global) into `shape`.
    pub fn unbox_raw(&self, raw: RawHandle, shape: Shape) -> Result<LocalValue> {
        if raw.is_null() {
            return match shape {
                Shape::String | Shape::Object => Ok(LocalValue::Null),
                _ => Err(BridgeError::mismatch(shape.name(), "null")),
            };
        }

        let native = self.native();
        match shape {
            Shape::Object => Ok(LocalValue::Object(RemoteObject::from_local(
                &self.registry,
                raw,
            )?)),
            Shape::String => {
                if !native.is_instance_of(raw, self.registry.boxing().string_class)? {
                    return Err(BridgeError::mismatch(STRING_CLASS, "object of another class"));
                }
                Ok(LocalValue::String(native.get_string(raw)?))
            }
            primitive => {
                let kind = primitive
                    .box_kind()
                    .ok_or_else(|| BridgeError::mismatch("primitive", primitive.name()))?;
                let entry = self.registry.boxing().entry(kind);

                if !native.is_instance_of(raw, entry.class)? {
                    return Err(BridgeError::mismatch(
                        kind.class_name(),
                        "object of another class",
                    ));
                }

                let value = native.call_method(raw, entry.unbox, &[])?;
                self.primitive_to_local(value, primitive)
            }
        }
    }

    /// Convert a primitive call result into the requested local shape.
    pub fn primitive_to_local(&self, value: JValue, shape: Shape) -> Result<LocalValue> {
        Ok(match (shape, value) {
            (Shape::Bool, JValue::Boolean(b)) => LocalValue::Bool(b),
            (Shape::I8, v @ (JValue::Byte(_) | JValue::UByte(_))) => {
                LocalValue::I8(self.decode_byte(v)? as i8)
            }
            (Shape::U8, v @ (JValue::Byte(_) | JValue::UByte(_))) => {
                LocalValue::U8(self.decode_byte(v)?)
            }
            (Shape::I16, JValue::Short(v)) => LocalValue::I16(v),
            (Shape::I32, JValue::Int(v)) => LocalValue::I32(v),
            (Shape::I64, JValue::Long(v)) => LocalValue::I64(v),
            (Shape::F32, JValue::Float(v)) => LocalValue::F32(v),
            (Shape::F64, JValue::Double(v)) => LocalValue::F64(v),
            (Shape::Char, JValue::Char(unit)) => char::from_u32(u32::from(unit))
                .map(LocalValue::Char)
                .ok_or_else(|| BridgeError::mismatch("char", "unpaired surrogate"))?,
            (shape, value) => return Err(BridgeError::mismatch(shape.name(), value.kind())),
        })
    }

    // Call arguments and results

    /// Marshal one value into a slot of type `sig`. Reference slots are boxed;
    /// the returned box must outlive the call that uses the `JValue`.
    pub fn marshal_arg(
        &self,
        sig: &TypeSig,
        value: &LocalValue,
    ) -> Result<(JValue, Option<BoxedValue>)> {
        if sig.is_reference() {
            let boxed = self.box_value(value)?;
            return Ok((JValue::Object(boxed.raw()), Some(boxed)));
        }

        let (_, slot) = self.primitive_slot(value)?;
        if !sig.accepts(&slot) {
            return Err(BridgeError::mismatch(sig.to_string(), value.type_name()));
        }
        Ok((slot, None))
    }

    pub fn marshal_args(
        &self,
        sig: &MethodSig,
        args: &[LocalValue],
    ) -> Result<(Vec<JValue>, Vec<BoxedValue>)> {
        if sig.args.len() != args.len() {
            return Err(BridgeError::mismatch(
                format!("{} arguments", sig.args.len()),
                format!("{} arguments", args.len()),
            ));
        }

        let mut values = Vec::with_capacity(args.len());
        let mut keepalive = Vec::new();
        for (param, arg) in sig.args.iter().zip(args) {
            let (value, boxed) = self.marshal_arg(param, arg)?;
            values.push(value);
            keepalive.extend(boxed);
        }

        Ok((values, keepalive))
    }

    /// Convert a call result of declared type `sig` into a local value.
    pub fn unmarshal_return(&self, sig: &TypeSig, value: JValue) -> Result<LocalValue> {
        let shape = match sig {
            TypeSig::Void => {
                return match value {
                    JValue::Void => Ok(LocalValue::Null),
                    other => Err(BridgeError::mismatch("void", other.kind())),
                };
            }
            TypeSig::Boolean => Shape::Bool,
            TypeSig::Byte => match self.signedness() {
                Signedness::Signed => Shape::I8,
                Signedness::Unsigned => Shape::U8,
            },
            TypeSig::Char => Shape::Char,
            TypeSig::Short => Shape::I16,
            TypeSig::Int => Shape::I32,
            TypeSig::Long => Shape::I64,
            TypeSig::Float => Shape::F32,
            TypeSig::Double => Shape::F64,
            TypeSig::Object(name) if name == STRING_CLASS => Shape::String,
            TypeSig::Object(_) | TypeSig::Array(_) => Shape::Object,
        };

        match shape {
            Shape::String | Shape::Object => {
                let raw = value
                    .as_object()
                    .ok_or_else(|| BridgeError::mismatch("object", value.kind()))?;
                self.unbox_raw(raw, shape)
            }
            primitive => self.primitive_to_local(value, primitive),
        }
    }
}

/// Local types that can be produced by unboxing.
pub trait FromRemote: Sized {
    const SHAPE: Shape;

    fn from_local_value(value: LocalValue) -> Result<Self>;
}

macro_rules! from_remote {
    ($($ty:ty => $variant:ident / $shape:ident),* $(,)?) => {
        $(
            impl FromRemote for $ty {
                const SHAPE: Shape = Shape::$shape;

                fn from_local_value(value: LocalValue) -> Result<Self> {
                    match value {
                        LocalValue::$variant(v) => Ok(v),
                        other => Err(BridgeError::mismatch(Shape::$shape.name(), other.type_name())),
                    }
                }
            }
        )*
    };
}

from_remote! {
    bool => Bool / Bool,
    i8 => I8 / I8,
    u8 => U8 / U8,
    i16 => I16 / I16,
    i32 => I32 / I32,
    i64 => I64 / I64,
    f32 => F32 / F32,
    f64 => F64 / F64,
    char => Char / Char,
    String => String / String,
    RemoteObject => Object / Object,
}

impl<T: FromRemote> FromRemote for Option<T> {
    const SHAPE: Shape = T::SHAPE;

    fn from_local_value(value: LocalValue) -> Result<Self> {
        match value {
            LocalValue::Null => Ok(None),
            other => T::from_local_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_of_values() {
        assert_eq!(LocalValue::from(3_i32).shape(), Some(Shape::I32));
        assert_eq!(LocalValue::from(0x80_u8).shape(), Some(Shape::U8));
        assert_eq!(LocalValue::from("hi").shape(), Some(Shape::String));
        assert_eq!(LocalValue::from(None::<i64>), LocalValue::Null);
        assert_eq!(LocalValue::Null.type_name(), "null");
    }

    #[test]
    fn test_box_kind_descriptors() {
        for kind in BoxKind::ALL {
            assert!(kind.class_name().starts_with("java/lang/"));
            let sig = TypeSig::parse(&kind.descriptor().to_string()).unwrap();
            assert!(!sig.is_reference());
        }
        assert_eq!(BoxKind::ALL[BoxKind::Double as usize], BoxKind::Double);
    }

    #[test]
    fn test_from_remote_rejects_wrong_variant() {
        assert_eq!(i32::from_local_value(LocalValue::I32(5)).unwrap(), 5);
        assert!(matches!(
            i32::from_local_value(LocalValue::I64(5)),
            Err(BridgeError::TypeMismatch { .. })
        ));
        assert_eq!(
            Option::<String>::from_local_value(LocalValue::Null).unwrap(),
            None
        );
    }
}
