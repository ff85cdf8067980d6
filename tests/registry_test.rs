mod common;

use std::collections::HashSet;
use std::thread;

use common::{POINT, setup};
use vmbridge::{
    AsRemoteObject, BridgeError, LocalValue, NativeInterface, RawHandle, RemoteObject, Shape,
};

fn point(registry: &vmbridge::Registry, x: i32, y: i32) -> RemoteObject {
    RemoteObject::new_instance(registry, POINT, "(II)V", &[x.into(), y.into()]).unwrap()
}

#[test]
fn test_initialization_caches_object_methods() {
    let (vm, registry) = setup();
    let methods = registry.object_methods();

    assert_eq!(vm.class_name(methods.class).unwrap(), "java/lang/Object");
    assert_ne!(methods.equals, methods.hash_code);
    assert!(registry.is_attached());
}

#[test]
fn test_wrappers_of_same_object_are_equal() {
    let (vm, registry) = setup();
    let local = vm.new_string("shared").unwrap();

    let a = RemoteObject::from_local(&registry, local).unwrap();
    let b = RemoteObject::from_local(&registry, local).unwrap();

    assert_ne!(a.raw(), b.raw());
    assert!(a.is_same_object(&b).unwrap());
    assert_eq!(a, b);
    assert_eq!(a.hash_code().unwrap(), b.hash_code().unwrap());
}

#[test]
fn test_equality_delegates_to_remote_equals() {
    let (_vm, registry) = setup();
    let p1 = point(&registry, 1, 2);
    let p2 = point(&registry, 1, 2);
    let p3 = point(&registry, 2, 1);

    assert!(!p1.is_same_object(&p2).unwrap());
    assert_eq!(p1, p2);
    assert_ne!(p1, p3);
    assert_eq!(p1.hash_code().unwrap(), 31 + 2);

    let set: HashSet<RemoteObject> = [p1, p2, p3].into_iter().collect();
    assert_eq!(set.len(), 2);
}

#[test]
fn test_display_delegates_to_remote_to_string() {
    let (vm, registry) = setup();
    assert_eq!(point(&registry, 3, 4).to_string(), "Point(3, 4)");

    let s = RemoteObject::adopt_local(&registry, vm.new_string("text").unwrap()).unwrap();
    assert_eq!(s.to_string(), "text");
    assert_eq!(s.hash_code().unwrap(), 3556653);
}

#[test]
fn test_default_object_display() {
    let (vm, registry) = setup();
    let class = vm.find_class("java/lang/Object").unwrap();
    let ctor = vm.get_method_id(class, "<init>", "()V").unwrap();
    let plain = RemoteObject::adopt_local(&registry, vm.new_object(class, ctor, &[]).unwrap())
        .unwrap();

    let shown = plain.to_string();
    let hash = plain.hash_code().unwrap();
    assert_eq!(shown, format!("java.lang.Object@{hash:x}"));
}

#[test]
fn test_comparisons_do_not_leak_locals() {
    let (vm, registry) = setup();
    let a = point(&registry, 1, 1);
    let b = point(&registry, 1, 1);
    let locals = vm.stats().local_refs;

    for _ in 0..1000 {
        assert!(a.try_equals(&b).unwrap());
        a.hash_code().unwrap();
        a.to_remote_string().unwrap();
    }

    assert_eq!(vm.stats().local_refs, locals);
}

#[test]
fn test_clones_share_one_global() {
    let (vm, registry) = setup();
    let original = point(&registry, 0, 0);
    let copy = original.clone();

    assert_eq!(original.raw(), copy.raw());
    assert_eq!(vm.global_refs_to(original.raw()).unwrap(), 1);

    let raw = original.raw();
    original.dispose();
    assert!(vm.is_valid_handle(raw));

    copy.dispose();
    assert!(!vm.is_valid_handle(raw));
    assert_eq!(vm.stats().invalid_handle_errors, 0);
}

#[test]
fn test_local_handle_is_caller_owned() {
    let (vm, registry) = setup();
    let p = point(&registry, 5, 5);

    let local = p.local_handle().unwrap();
    assert_ne!(local.raw(), p.raw());
    assert!(vm.is_same_object(local.raw(), p.raw()).unwrap());

    registry.delete_local(local);
    assert!(vm.is_valid_handle(p.raw()));
}

#[test]
fn test_invoke_method_and_fields() {
    let (_vm, registry) = setup();
    let p = point(&registry, 2, 3);

    assert_eq!(p.get_field("x", "I").unwrap(), LocalValue::I32(2));
    p.set_field("y", "I", &LocalValue::I32(7)).unwrap();
    assert_eq!(p.to_string(), "Point(2, 7)");

    let scaled = p
        .invoke_method("scale", "(B)Ldemo/Point;", &[LocalValue::I8(3)])
        .unwrap();
    let LocalValue::Object(scaled) = scaled else {
        panic!("expected object, got {scaled:?}");
    };
    assert_eq!(scaled.to_string(), "Point(6, 21)");

    let text = p
        .invoke_method("toString", "()Ljava/lang/String;", &[])
        .unwrap();
    assert_eq!(text, LocalValue::String("Point(2, 7)".into()));
}

#[test]
fn test_lookup_errors() {
    let (_vm, registry) = setup();
    let p = point(&registry, 0, 0);

    assert!(matches!(
        p.invoke_method("missing", "()V", &[]),
        Err(BridgeError::MethodNotFound { .. })
    ));
    assert!(matches!(
        p.get_field("z", "I"),
        Err(BridgeError::FieldNotFound { .. })
    ));
    assert!(matches!(
        p.invoke_method("scale", "(B", &[]),
        Err(BridgeError::InvalidSignature(_))
    ));
    assert!(matches!(
        RemoteObject::new_instance(&registry, "demo/Missing", "()V", &[]),
        Err(BridgeError::ClassNotFound(_))
    ));
}

#[test]
fn test_argument_type_is_checked() {
    let (_vm, registry) = setup();
    let p = point(&registry, 0, 0);

    assert!(matches!(
        p.set_field("x", "I", &LocalValue::String("one".into())),
        Err(BridgeError::TypeMismatch { .. })
    ));
    assert!(matches!(
        p.invoke_method("scale", "(B)Ldemo/Point;", &[LocalValue::I32(2)]),
        Err(BridgeError::TypeMismatch { .. })
    ));
}

#[test]
fn test_unbox_through_object() {
    let (_vm, registry) = setup();
    let boxed = registry.marshaller().box_value(&LocalValue::I64(-9)).unwrap();
    let object = boxed.as_object().unwrap();

    assert_eq!(object.unbox(Shape::I64).unwrap(), LocalValue::I64(-9));
    assert_eq!(object.to_string(), "-9");
    assert_eq!(object.as_remote_object().unwrap().raw(), object.raw());
}

#[test]
fn test_stale_handle_is_reported() {
    let (vm, registry) = setup();
    let local = vm.new_string("short-lived").unwrap();
    vm.delete_local_ref(local).unwrap();

    assert_eq!(
        registry.acquire_global(local).unwrap_err(),
        BridgeError::InvalidHandle(local)
    );
}

#[test]
fn test_unattached_thread_cannot_acquire() {
    let (vm, registry) = setup();
    let global = registry
        .acquire_global(vm.new_string("pinned").unwrap())
        .unwrap();
    let raw = global.raw();

    let other = registry.clone();
    let result = thread::spawn(move || other.acquire_global(raw).map(|g| g.raw()))
        .join()
        .unwrap();
    assert_eq!(result, Err(BridgeError::NotAttached));

    let other = registry.clone();
    let result = thread::spawn(move || {
        other.attach_current_thread()?;
        let g = other.acquire_global(raw)?;
        Ok::<_, BridgeError>(g.raw() != RawHandle::NULL)
    })
    .join()
    .unwrap();
    assert_eq!(result, Ok(true));
}
