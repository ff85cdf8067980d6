mod common;

use std::thread;

use vmbridge::{BridgeError, platform};

// The process registry is global, so the whole lifecycle runs in one test.
#[test]
fn test_process_registry_lifecycle() {
    assert!(!platform::is_installed());
    assert!(matches!(platform::registry(), Err(BridgeError::Config(_))));

    let (_vm, first) = common::setup();
    let installed = platform::install(first.clone());
    assert!(installed.ptr_eq(&first));
    assert!(platform::is_installed());

    let (_other_vm, second) = common::setup();
    assert!(platform::install(second.clone()).ptr_eq(&first));
    assert!(!platform::registry().unwrap().ptr_eq(&second));

    let fetched = platform::get_or_install(|| panic!("already installed")).unwrap();
    assert!(fetched.ptr_eq(&first));

    let seen_elsewhere = thread::spawn(|| {
        let registry = platform::registry().unwrap();
        registry.attach_current_thread().unwrap();
        registry
            .marshaller()
            .box_any(&"from a callback thread")
            .is_ok()
    })
    .join()
    .unwrap();
    assert!(seen_elsewhere);
}
