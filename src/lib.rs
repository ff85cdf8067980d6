//! Lifetime-safe bridge between local code and a remote managed runtime.
//!
//! The remote runtime is reached through [`NativeInterface`]. On top of it:
//!
//! - [`Registry`] manages handle lifetimes: global references owned by
//!   [`GlobalRef`], bounded local frames via [`Registry::with_scope`], and
//!   deferred release for handles dropped on unattached threads.
//! - [`RemoteObject`] wraps one remote object and delegates `==`, `Hash` and
//!   `Display` to its remote `equals`, `hashCode` and `toString`.
//! - [`Marshaller`] boxes local values into remote objects and back.
//! - [`RemoteProxy`] presents a local [`ProxyHandler`] to the remote runtime
//!   as an implementation of one of its interfaces.
//!
//! [`vm::Vm`] is an in-process runtime implementing the same interface.

// Lets `#[derive(AsRemoteObject)]` refer to `::vmbridge` from inside the crate
extern crate self as vmbridge;

pub mod config;
pub mod descriptor;
pub mod error;
pub mod marshal;
pub mod native;
pub mod object;
pub mod platform;
pub mod proxy;
pub mod refs;
pub mod registry;
pub mod vm;

// Core API
pub use config::{BridgeConfig, Signedness};
pub use error::{BridgeError, Result};
pub use marshal::{BoxedValue, FromRemote, LocalValue, Marshaller, Shape};
pub use native::{FieldId, InvocationTarget, JValue, MethodId, NativeInterface, RawHandle};
pub use object::{AsRemoteObject, RemoteObject};
pub use proxy::{IdentityOnly, ProxyCall, ProxyHandler, RemoteProxy};
pub use refs::{GlobalRef, LocalRef};
pub use registry::{ObjectMethods, Registry, WeakRegistry};

pub use vmbridge_derive::AsRemoteObject;
