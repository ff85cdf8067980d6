//! Tests for reference lifetimes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::native::{NativeInterface, RawHandle};
use crate::object::{AsRemoteObject, RemoteObject};
use crate::registry::Registry;
use crate::vm::{Vm, VmOptions};

fn setup() -> (Arc<Vm>, Registry) {
    let vm = Arc::new(Vm::new(VmOptions::default()).unwrap());
    let registry = Registry::new(vm.clone(), BridgeConfig::default()).unwrap();
    (vm, registry)
}

// Test derive macro (using crate_path for internal usage)
#[derive(crate::AsRemoteObject)]
#[remote(crate_path = "crate")]
struct Named {
    #[remote(handle)]
    object: RemoteObject,
    #[allow(dead_code)]
    label: &'static str,
}

#[derive(crate::AsRemoteObject)]
#[remote(crate_path = "crate")]
struct Nested(#[remote(handle)] Named);

#[test]
fn test_derive_as_remote_object() {
    let (vm, registry) = setup();
    let local = vm.new_string("derived").unwrap();
    let object = RemoteObject::from_local(&registry, local).unwrap();

    let named = Named {
        object: object.clone(),
        label: "x",
    };
    assert_eq!(named.as_remote_object().unwrap().raw(), object.raw());

    let nested = Nested(named);
    let handle = nested.local_handle().unwrap();
    assert_eq!(vm.get_string(handle.raw()).unwrap(), "derived");
    registry.delete_local(handle);
}

#[test]
fn test_acquire_and_release() {
    let (vm, registry) = setup();
    let local = vm.new_string("value").unwrap();
    let before = vm.stats();

    let global = registry.acquire_global(local).unwrap();
    assert_ne!(global.raw(), local);
    assert!(vm.is_valid_handle(local));
    assert_eq!(vm.stats().global_refs, before.global_refs + 1);

    registry.release(&global);
    assert!(global.is_released());
    assert_eq!(vm.stats().global_refs, before.global_refs);
}

#[test]
fn test_release_is_idempotent() {
    let (vm, registry) = setup();
    let local = vm.new_string("twice").unwrap();
    let global = registry.acquire_global(local).unwrap();
    let deleted = vm.stats().globals_deleted;

    registry.release(&global);
    registry.release(&global);
    global.release();
    drop(global);

    let stats = vm.stats();
    assert_eq!(stats.globals_deleted, deleted + 1);
    assert_eq!(stats.invalid_handle_errors, 0);
}

#[test]
fn test_acquire_null_is_invalid() {
    let (_vm, registry) = setup();
    assert!(matches!(
        registry.acquire_global(RawHandle::NULL),
        Err(BridgeError::InvalidHandle(_))
    ));
    assert!(registry.duplicate_local(RawHandle::NULL).unwrap().is_null());
}

#[test]
fn test_adopt_local_deletes_the_local() {
    let (vm, registry) = setup();
    let local = vm.new_string("adopted").unwrap();

    let global = registry.adopt_local(local).unwrap();
    assert!(!vm.is_valid_handle(local));
    assert_eq!(vm.get_string(global.raw()).unwrap(), "adopted");
}

#[test]
fn test_scope_releases_locals() {
    let (vm, registry) = setup();
    let locals = vm.stats().local_refs;

    let len = registry
        .with_scope(|| {
            for i in 0..10 {
                vm.new_string(&format!("temp {i}"))?;
            }
            Ok(vm.stats().local_refs)
        })
        .unwrap();

    assert_eq!(len, locals + 10);
    assert_eq!(vm.stats().local_refs, locals);
}

#[test]
fn test_scope_releases_locals_on_error() {
    let (vm, registry) = setup();
    let locals = vm.stats().local_refs;

    let result: crate::Result<()> = registry.with_scope(|| {
        vm.new_string("leaked?")?;
        Err(BridgeError::RemoteException("boom".into()))
    });

    assert!(result.is_err());
    assert_eq!(vm.stats().local_refs, locals);
}

#[test]
fn test_scope_releases_locals_on_panic() {
    let (vm, registry) = setup();
    let locals = vm.stats().local_refs;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        registry.with_scope(|| -> crate::Result<()> {
            vm.new_string("unwound").unwrap();
            panic!("body panicked");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(vm.stats().local_refs, locals);
}

#[test]
fn test_nested_scopes() {
    let (vm, registry) = setup();
    let locals = vm.stats().local_refs;

    registry
        .with_scope(|| {
            let outer = vm.new_string("outer")?;
            registry.with_scope(|| {
                vm.new_string("inner")?;
                assert_eq!(vm.stats().local_refs, locals + 2);
                Ok(())
            })?;

            assert_eq!(vm.stats().local_refs, locals + 1);
            assert!(vm.is_valid_handle(outer));
            Ok(())
        })
        .unwrap();

    assert_eq!(vm.stats().local_refs, locals);
}

#[test]
fn test_scope_returning_promotes_one_local() {
    let (vm, registry) = setup();
    let locals = vm.stats().local_refs;

    let kept = registry
        .with_scope_returning(|| {
            vm.new_string("discarded")?;
            let keep = vm.new_string("kept")?;
            Ok(crate::LocalRef::new(keep))
        })
        .unwrap();

    assert_eq!(vm.stats().local_refs, locals + 1);
    assert_eq!(vm.get_string(kept.raw()).unwrap(), "kept");
}

#[test]
fn test_drop_on_unattached_thread_is_deferred() {
    let (vm, registry) = setup();
    let local = vm.new_string("far away").unwrap();
    let global = registry.acquire_global(local).unwrap();
    let raw = global.raw();

    thread::spawn(move || drop(global)).join().unwrap();

    assert_eq!(registry.pending_releases(), 1);
    assert!(vm.is_valid_handle(raw));

    registry.attach_current_thread().unwrap();
    assert_eq!(registry.pending_releases(), 0);
    assert!(!vm.is_valid_handle(raw));
    assert_eq!(vm.stats().invalid_handle_errors, 0);
}

#[test]
fn test_delete_local_never_fails() {
    let (vm, registry) = setup();
    let local = vm.new_string("gone").unwrap();
    registry.delete_local(crate::LocalRef::new(local));
    registry.delete_local(crate::LocalRef::new(local));

    assert!(!vm.is_valid_handle(local));
    assert_eq!(vm.stats().invalid_handle_errors, 1);
}

#[test]
fn test_release_of_stale_global_is_logged_not_raised() {
    let (vm, registry) = setup();
    let local = vm.new_string("short lived").unwrap();
    let global = vm.new_global_ref(local).unwrap();
    crate::registry::release_quietly(&*vm, global);
    crate::registry::release_quietly(&*vm, global);

    assert!(!vm.is_valid_handle(global));
    assert_eq!(vm.stats().invalid_handle_errors, 1);
    assert_eq!(registry.pending_releases(), 0);
}
