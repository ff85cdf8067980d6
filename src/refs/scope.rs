//! Bounded local reference frames.

use crate::error::Result;
use crate::native::{NativeInterface, RawHandle};

/// RAII guard for one pushed local frame.
///
/// The frame is popped exactly once: either explicitly through
/// [`pop_with`](Self::pop_with) or on drop, which also covers early returns
/// and unwinding out of the scoped body.
pub(crate) struct FrameGuard<'a> {
    native: &'a dyn NativeInterface,
    popped: bool,
}

impl<'a> FrameGuard<'a> {
    pub(crate) fn push(native: &'a dyn NativeInterface, capacity: usize) -> Result<Self> {
        native.push_local_frame(capacity)?;
        Ok(Self {
            native,
            popped: false,
        })
    }

    /// Pop the frame, keeping `result` alive as a local in the parent frame.
    pub(crate) fn pop_with(mut self, result: RawHandle) -> Result<RawHandle> {
        self.popped = true;
        self.native.pop_local_frame(result)
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if self.popped {
            return;
        }

        if let Err(e) = self.native.pop_local_frame(RawHandle::NULL) {
            log::warn!("Failed to pop local reference frame: {}", e);
        }
    }
}

/// Run `body` inside a fresh local frame.
pub(crate) fn run_in_frame<T>(
    native: &dyn NativeInterface,
    capacity: usize,
    body: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let _frame = FrameGuard::push(native, capacity)?;
    body()
}
