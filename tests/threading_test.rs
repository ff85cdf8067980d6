mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{LISTENER, POINT, setup};
use vmbridge::{
    IdentityOnly, JValue, LocalValue, NativeInterface, RemoteObject, RemoteProxy, Shape,
};

#[test]
fn test_concurrent_marshalling() {
    let (vm, registry) = setup();
    let before = vm.stats();
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                registry.attach_current_thread().unwrap();
                barrier.wait();

                let marshaller = registry.marshaller();
                for i in 0..200 {
                    let value = LocalValue::I64((t * 1000 + i) as i64);
                    let boxed = marshaller.box_value(&value).unwrap();
                    assert_eq!(marshaller.unbox(&boxed, Shape::I64).unwrap(), value);

                    let text = format!("thread {t} item {i}");
                    let boxed = marshaller.box_any(&text).unwrap();
                    assert_eq!(marshaller.unbox_as::<String>(&boxed).unwrap(), text);
                }

                let point = RemoteObject::new_instance(
                    &registry,
                    POINT,
                    "(II)V",
                    &[(t as i32).into(), 0.into()],
                )
                .unwrap();
                point.to_string()
            })
        })
        .collect();

    let mut shown: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    shown.sort();
    assert_eq!(shown.first().map(String::as_str), Some("Point(0, 0)"));
    assert_eq!(shown.len(), threads);

    let after = vm.stats();
    assert_eq!(after.global_refs, before.global_refs);
    assert_eq!(after.invalid_handle_errors, 0);
    assert_eq!(after.attached_threads, before.attached_threads + threads);
}

#[test]
fn test_objects_move_between_threads() {
    let (vm, registry) = setup();
    let point =
        RemoteObject::new_instance(&registry, POINT, "(II)V", &[4.into(), 2.into()]).unwrap();
    let globals = vm.stats().global_refs;

    let other = registry.clone();
    let shown = thread::spawn(move || {
        other.attach_current_thread().unwrap();
        let shown = point.to_string();
        drop(point);
        shown
    })
    .join()
    .unwrap();

    assert_eq!(shown, "Point(4, 2)");
    assert_eq!(vm.stats().global_refs, globals - 1);
    assert_eq!(registry.pending_releases(), 0);
}

#[test]
fn test_drops_on_unattached_threads_are_flushed() {
    let (vm, registry) = setup();
    let marshaller = registry.marshaller();
    let boxes: Vec<_> = (0..5)
        .map(|i| marshaller.box_value(&LocalValue::I32(i)).unwrap())
        .collect();
    let globals = vm.stats().global_refs;

    thread::spawn(move || drop(boxes)).join().unwrap();
    assert_eq!(registry.pending_releases(), 5);
    assert_eq!(vm.stats().global_refs, globals);

    // Any scoped operation on an attached thread flushes the queue
    registry.with_scope(|| Ok(())).unwrap();
    assert_eq!(registry.pending_releases(), 0);
    assert_eq!(vm.stats().global_refs, globals - 5);
    assert_eq!(vm.stats().invalid_handle_errors, 0);
}

#[test]
fn test_last_registry_dropped_on_unattached_thread() {
    let (vm, registry) = setup();
    let boxed = registry.marshaller().box_value(&LocalValue::I32(7)).unwrap();
    let raw = boxed.raw();
    drop(registry);
    assert!(vm.is_valid_handle(raw));

    // The box holds the last registry clone
    thread::spawn(move || drop(boxed)).join().unwrap();

    let stats = vm.stats();
    assert!(!vm.is_valid_handle(raw));
    assert_eq!(stats.global_refs, 0);
    assert_eq!(stats.invalid_handle_errors, 0);
}

#[test]
fn test_proxy_called_from_other_threads() {
    let (vm, registry) = setup();
    let proxy = RemoteProxy::new(&registry, LISTENER, IdentityOnly);
    let handle = proxy.remote_handle().unwrap();
    let pinned = registry.acquire_global(handle.raw()).unwrap();
    let expected = proxy.hash_code();
    let raw = pinned.raw();

    let results: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            let vm = vm.clone();
            thread::spawn(move || {
                registry.attach_current_thread().unwrap();
                let methods = registry.object_methods();
                vm.call_method(raw, methods.hash_code, &[]).unwrap()
            })
        })
        .collect();

    for result in results {
        assert_eq!(result.join().unwrap(), JValue::Int(expected));
    }
    assert!(proxy.is_bound());
}

#[test]
fn test_detached_thread_loses_its_locals() {
    let (vm, registry) = setup();
    let locals = vm.stats().local_refs;

    let other = registry.clone();
    let worker_vm = vm.clone();
    thread::spawn(move || {
        other.attach_current_thread().unwrap();
        worker_vm.new_string("left behind").unwrap();
        assert!(worker_vm.detach_current_thread());
        assert!(!other.is_attached());
    })
    .join()
    .unwrap();

    assert_eq!(vm.stats().local_refs, locals);
}
