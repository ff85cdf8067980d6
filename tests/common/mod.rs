#![allow(dead_code)]

use std::sync::Arc;

use vmbridge::vm::{ClassBuilder, Vm, VmOptions};
use vmbridge::{BridgeConfig, JValue, NativeInterface, Registry, Signedness};

pub const LISTENER: &str = "demo/Listener";
pub const POINT: &str = "demo/Point";

/// A fresh runtime and a registry attached to the calling thread.
pub fn setup() -> (Arc<Vm>, Registry) {
    setup_with(Signedness::Signed)
}

/// Runtime and bridge agreeing on `signedness`.
pub fn setup_with(signedness: Signedness) -> (Arc<Vm>, Registry) {
    setup_mismatched(signedness, signedness)
}

/// Runtime speaking `remote` while the bridge is configured for `configured`.
pub fn setup_mismatched(remote: Signedness, configured: Signedness) -> (Arc<Vm>, Registry) {
    let vm = Arc::new(Vm::new(VmOptions::default().with_byte_signedness(remote)).unwrap());
    define_demo_classes(&vm);

    let config = BridgeConfig::default().with_byte_signedness(configured);
    let registry = Registry::new(vm.clone(), config).unwrap();
    (vm, registry)
}

/// `demo/Listener`: an interface for proxies.
///
/// `demo/Point`: a class with two int fields, value equality and a custom
/// `toString`.
fn define_demo_classes(vm: &Vm) {
    vm.define_class(
        ClassBuilder::interface(LISTENER)
            .abstract_method("compute", "(II)I")
            .abstract_method("onEvent", "(Ljava/lang/Object;)Ljava/lang/Object;")
            .abstract_method("ping", "()V"),
    )
    .unwrap();

    vm.define_class(
        ClassBuilder::new(POINT)
            .field("x", "I")
            .field("y", "I")
            .constructor("(II)V", |vm, call| {
                let class = vm.get_object_class(call.this)?;
                for (name, value) in ["x", "y"].into_iter().zip(call.args) {
                    let field = vm.get_field_id(class, name, "I")?;
                    vm.set_field(call.this, field, *value)?;
                }
                Ok(JValue::Void)
            })
            .method("equals", "(Ljava/lang/Object;)Z", |vm, call| {
                let other = call.object_arg(0)?;
                if other.is_null() || vm.class_name_of(other)? != POINT {
                    return Ok(JValue::Boolean(false));
                }
                Ok(JValue::Boolean(coords(vm, call.this)? == coords(vm, other)?))
            })
            .method("hashCode", "()I", |vm, call| {
                let (x, y) = coords(vm, call.this)?;
                Ok(JValue::Int(31 * x + y))
            })
            .method("toString", "()Ljava/lang/String;", |vm, call| {
                let (x, y) = coords(vm, call.this)?;
                Ok(JValue::Object(vm.new_string(&format!("Point({x}, {y})"))?))
            })
            .method("scale", "(B)Ldemo/Point;", |vm, call| {
                let factor = match call.arg(0)? {
                    JValue::Byte(b) => i32::from(b),
                    JValue::UByte(b) => i32::from(b),
                    other => return Err(vmbridge::BridgeError::RemoteException(format!(
                        "bad factor {other:?}"
                    ))),
                };
                let (x, y) = coords(vm, call.this)?;
                let class = vm.get_object_class(call.this)?;
                let ctor = vm.get_method_id(class, "<init>", "(II)V")?;
                let scaled =
                    vm.new_object(class, ctor, &[JValue::Int(x * factor), JValue::Int(y * factor)])?;
                Ok(JValue::Object(scaled))
            })
            .method("echo", "(B)B", |_, call| call.arg(0)),
    )
    .unwrap();
}

fn coords(vm: &Vm, point: vmbridge::RawHandle) -> vmbridge::Result<(i32, i32)> {
    let class = vm.get_object_class(point)?;
    let mut out = [0; 2];
    for (slot, name) in out.iter_mut().zip(["x", "y"]) {
        let field = vm.get_field_id(class, name, "I")?;
        *slot = vm.get_field(point, field)?.as_int().unwrap_or_default();
    }
    Ok((out[0], out[1]))
}
