//! Owned global references and borrowed local references.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::native::RawHandle;
use crate::registry::Registry;

/// A global reference owned by the local side.
///
/// The remote object stays pinned until [`release`](Self::release) is called
/// or the value is dropped, whichever comes first. Releasing is idempotent:
/// the handle is swapped out atomically, so only the first release reaches
/// the runtime.
pub struct GlobalRef {
    registry: Registry,
    raw: AtomicU64,
}

impl GlobalRef {
    /// Take ownership of an existing global handle.
    pub(crate) fn from_raw(registry: Registry, raw: RawHandle) -> Self {
        Self {
            registry,
            raw: AtomicU64::new(raw.as_raw()),
        }
    }

    /// The owned handle, or `NULL` once released.
    pub fn raw(&self) -> RawHandle {
        RawHandle::from_raw(self.raw.load(Ordering::Acquire))
    }

    pub fn is_released(&self) -> bool {
        self.raw().is_null()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Release the handle now. Later calls and the eventual drop are no-ops.
    pub fn release(&self) {
        self.registry.release(self);
    }

    pub(crate) fn take(&self) -> RawHandle {
        RawHandle::from_raw(self.raw.swap(0, Ordering::AcqRel))
    }
}

impl Drop for GlobalRef {
    fn drop(&mut self) {
        let raw = self.take();
        self.registry.release_raw(raw);
    }
}

impl fmt::Debug for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalRef").field(&self.raw()).finish()
    }
}

/// A local reference: valid until its frame is popped or it is deleted.
///
/// Not owned; dropping a `LocalRef` does nothing. Use
/// [`Registry::delete_local`] for early deletion or let the enclosing
/// [`Registry::with_scope`] reclaim it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalRef(RawHandle);

impl LocalRef {
    pub const NULL: LocalRef = LocalRef(RawHandle::NULL);

    pub fn new(raw: RawHandle) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> RawHandle {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl fmt::Debug for LocalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalRef({})", self.0)
    }
}
