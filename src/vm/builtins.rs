//! Built-in classes: `Object`, `Class`, `String` and the primitive boxes.
//!
//! `equals`, `hashCode` and `toString` follow the Java definitions so that
//! values observed through the bridge match what a JVM would report.

use crate::config::Signedness;
use crate::error::Result;
use crate::native::{JValue, NativeInterface};

use super::class::{Call, ClassBuilder};
use super::heap::{CLASS_CLASS, OBJECT_CLASS, VmState};
use super::{Vm, add_members, define_in};

const BOXES: [(&str, &str, &str); 8] = [
    ("java/lang/Boolean", "Z", "booleanValue"),
    ("java/lang/Byte", "B", "byteValue"),
    ("java/lang/Character", "C", "charValue"),
    ("java/lang/Short", "S", "shortValue"),
    ("java/lang/Integer", "I", "intValue"),
    ("java/lang/Long", "J", "longValue"),
    ("java/lang/Float", "F", "floatValue"),
    ("java/lang/Double", "D", "doubleValue"),
];

pub(super) fn install(state: &mut VmState, signedness: Signedness) -> Result<()> {
    add_members(state, OBJECT_CLASS, object_class(), signedness)?;
    add_members(state, CLASS_CLASS, class_class(), signedness)?;
    define_in(state, string_class(), signedness)?;

    for (class, descriptor, unbox) in BOXES {
        define_in(state, box_class(class, descriptor, unbox), signedness)?;
    }
    Ok(())
}

fn string_result(vm: &Vm, value: &str) -> Result<JValue> {
    Ok(JValue::Object(vm.new_string(value)?))
}

fn object_class() -> ClassBuilder {
    ClassBuilder::new("java/lang/Object")
        .constructor("()V", |_, _| Ok(JValue::Void))
        .method("equals", "(Ljava/lang/Object;)Z", |vm, call| {
            Ok(JValue::Boolean(vm.is_same_object(call.this, call.object_arg(0)?)?))
        })
        .method("hashCode", "()I", |vm, call| {
            Ok(JValue::Int(vm.identity_hash(call.this)?))
        })
        .method("toString", "()Ljava/lang/String;", |vm, call| {
            let name = vm.class_name_of(call.this)?.replace('/', ".");
            let hash = vm.identity_hash(call.this)?;
            string_result(vm, &format!("{name}@{hash:x}"))
        })
        .method("getClass", "()Ljava/lang/Class;", |vm, call| {
            Ok(JValue::Object(vm.get_object_class(call.this)?))
        })
}

fn class_class() -> ClassBuilder {
    ClassBuilder::new("java/lang/Class")
        .method("getName", "()Ljava/lang/String;", |vm, call| {
            string_result(vm, &vm.class_name(call.this)?.replace('/', "."))
        })
        .method("toString", "()Ljava/lang/String;", |vm, call| {
            let name = vm.class_name(call.this)?.replace('/', ".");
            string_result(vm, &format!("class {name}"))
        })
}

fn string_class() -> ClassBuilder {
    ClassBuilder::new("java/lang/String")
        .method("equals", "(Ljava/lang/Object;)Z", |vm, call| {
            let other = call.object_arg(0)?;
            if other.is_null() {
                return Ok(JValue::Boolean(false));
            }
            let this = vm.get_string(call.this)?;
            Ok(JValue::Boolean(vm.string_value(other)?.as_deref() == Some(this.as_str())))
        })
        .method("hashCode", "()I", |vm, call| {
            Ok(JValue::Int(string_hash(&vm.get_string(call.this)?)))
        })
        .method("toString", "()Ljava/lang/String;", |_, call| {
            Ok(JValue::Object(call.this))
        })
        .method("length", "()I", |vm, call| {
            let units = vm.get_string(call.this)?.encode_utf16().count();
            Ok(JValue::Int(units as i32))
        })
}

fn box_class(class: &'static str, descriptor: &str, unbox: &str) -> ClassBuilder {
    ClassBuilder::new(class)
        .static_method(
            "valueOf",
            format!("({descriptor})L{class};"),
            |vm, call| Ok(JValue::Object(vm.box_primitive(call.arg(0)?)?)),
        )
        .method(unbox, format!("(){descriptor}"), |vm, call| {
            vm.unbox_primitive(call.this)
        })
        .method("equals", "(Ljava/lang/Object;)Z", |vm, call| {
            Ok(JValue::Boolean(box_equals(vm, call)?))
        })
        .method("hashCode", "()I", |vm, call| {
            Ok(JValue::Int(primitive_hash(vm.unbox_primitive(call.this)?)))
        })
        .method("toString", "()Ljava/lang/String;", |vm, call| {
            string_result(vm, &primitive_string(vm.unbox_primitive(call.this)?))
        })
}

fn box_equals(vm: &Vm, call: &Call<'_>) -> Result<bool> {
    let other = call.object_arg(0)?;
    if other.is_null() {
        return Ok(false);
    }

    let Some(theirs) = vm.boxed_value(other)? else {
        return Ok(false);
    };
    if vm.class_name_of(call.this)? != vm.class_name_of(other)? {
        return Ok(false);
    }

    let ours = vm.unbox_primitive(call.this)?;
    Ok(match (ours, theirs) {
        (JValue::Float(a), JValue::Float(b)) => float_bits(a) == float_bits(b),
        (JValue::Double(a), JValue::Double(b)) => double_bits(a) == double_bits(b),
        (a, b) => a == b,
    })
}

fn float_bits(value: f32) -> u32 {
    if value.is_nan() {
        0x7fc0_0000
    } else {
        value.to_bits()
    }
}

fn double_bits(value: f64) -> u64 {
    if value.is_nan() {
        0x7ff8_0000_0000_0000
    } else {
        value.to_bits()
    }
}

fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

fn primitive_hash(value: JValue) -> i32 {
    match value {
        JValue::Boolean(true) => 1231,
        JValue::Boolean(false) => 1237,
        JValue::Byte(b) => i32::from(b),
        JValue::UByte(b) => i32::from(b),
        JValue::Char(c) => i32::from(c),
        JValue::Short(s) => i32::from(s),
        JValue::Int(i) => i,
        JValue::Long(l) => (l ^ ((l as u64) >> 32) as i64) as i32,
        JValue::Float(f) => float_bits(f) as i32,
        JValue::Double(d) => {
            let bits = double_bits(d);
            (bits ^ (bits >> 32)) as i32
        }
        JValue::Void | JValue::Object(_) => 0,
    }
}

fn primitive_string(value: JValue) -> String {
    match value {
        JValue::Boolean(b) => b.to_string(),
        JValue::Byte(b) => b.to_string(),
        JValue::UByte(b) => b.to_string(),
        JValue::Char(c) => char::from_u32(u32::from(c))
            .unwrap_or(char::REPLACEMENT_CHARACTER)
            .to_string(),
        JValue::Short(s) => s.to_string(),
        JValue::Int(i) => i.to_string(),
        JValue::Long(l) => l.to_string(),
        JValue::Float(f) => decimal_string(f64::from(f), f.to_string()),
        JValue::Double(d) => decimal_string(d, d.to_string()),
        JValue::Void => "void".into(),
        JValue::Object(h) => h.to_string(),
    }
}

fn decimal_string(value: f64, shortest: String) -> String {
    if value.is_nan() {
        "NaN".into()
    } else if value.is_infinite() {
        String::from(if value > 0.0 { "Infinity" } else { "-Infinity" })
    } else if shortest.contains(['.', 'e', 'E']) {
        shortest
    } else {
        format!("{shortest}.0")
    }
}
