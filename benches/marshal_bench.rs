//! Benchmarks for boundary crossings
//!
//! Measures:
//! - Boxing and unboxing primitives and strings
//! - Scoped local frames
//! - Remote calls into a proxy

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use vmbridge::vm::{ClassBuilder, Vm, VmOptions};
use vmbridge::{
    BridgeConfig, JValue, LocalValue, NativeInterface, ProxyCall, ProxyHandler, Registry,
    RemoteProxy, Shape,
};

fn setup() -> (Arc<Vm>, Registry) {
    let vm = Arc::new(Vm::new(VmOptions::default()).unwrap());
    vm.define_class(ClassBuilder::interface("bench/Adder").abstract_method("add", "(II)I"))
        .unwrap();
    let registry = Registry::new(vm.clone(), BridgeConfig::default()).unwrap();
    (vm, registry)
}

fn bench_box_unbox(c: &mut Criterion) {
    let (_vm, registry) = setup();
    let marshaller = registry.marshaller();

    c.bench_function("box_unbox_i32", |b| {
        b.iter(|| {
            let boxed = marshaller.box_value(&LocalValue::I32(black_box(42))).unwrap();
            black_box(marshaller.unbox(&boxed, Shape::I32).unwrap());
        });
    });

    c.bench_function("box_unbox_u8", |b| {
        b.iter(|| {
            let boxed = marshaller.box_value(&LocalValue::U8(black_box(0xf0))).unwrap();
            black_box(marshaller.unbox(&boxed, Shape::U8).unwrap());
        });
    });

    let text = "a moderately sized string crossing the boundary".repeat(4);
    c.bench_function("box_unbox_string", |b| {
        b.iter(|| {
            let boxed = marshaller.box_any(&text).unwrap();
            black_box(marshaller.unbox_as::<String>(&boxed).unwrap());
        });
    });
}

fn bench_scope(c: &mut Criterion) {
    let (vm, registry) = setup();

    c.bench_function("with_scope_8_locals", |b| {
        b.iter(|| {
            registry
                .with_scope(|| {
                    for _ in 0..8 {
                        black_box(vm.new_string("temp")?);
                    }
                    Ok(())
                })
                .unwrap();
        });
    });
}

struct Adder;

impl ProxyHandler for Adder {
    fn invoke(&self, call: &ProxyCall<'_>) -> vmbridge::Result<Option<LocalValue>> {
        let a: i32 = call.arg(0)?;
        let b: i32 = call.arg(1)?;
        Ok(Some(LocalValue::I32(a.wrapping_add(b))))
    }
}

fn bench_proxy_call(c: &mut Criterion) {
    let (vm, registry) = setup();
    let proxy = RemoteProxy::new(&registry, "bench/Adder", Adder);
    let handle = proxy.remote_handle().unwrap();
    let iface = vm.find_class("bench/Adder").unwrap();
    let add = vm.get_method_id(iface, "add", "(II)I").unwrap();

    c.bench_function("proxy_remote_call", |b| {
        b.iter(|| {
            black_box(
                vm.call_method(handle.raw(), add, &[JValue::Int(1), JValue::Int(2)])
                    .unwrap(),
            );
        });
    });
}

criterion_group!(benches, bench_box_unbox, bench_scope, bench_proxy_call);
criterion_main!(benches);
