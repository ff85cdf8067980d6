//! Deferred release queue for global handles.
//!
//! ## Problem
//!
//! Deleting a global reference is a call into the remote runtime, and the
//! runtime only accepts calls from attached threads. A [`GlobalRef`] may be
//! dropped anywhere, including threads that never attached.
//!
//! ## Solution
//!
//! Queue the raw handle instead, and drain the queue the next time the
//! registry runs on an attached thread.
//!
//! [`GlobalRef`]: super::GlobalRef

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::native::RawHandle;

/// Per-registry queue of global handles awaiting deletion.
///
/// Thread-safe; handles can be queued from any thread.
pub struct DeferredReleaseQueue {
    queue: Mutex<Vec<RawHandle>>,

    /// Fast check for pending items (avoids lock acquisition on hot path)
    pending_count: AtomicU64,
}

impl Default for DeferredReleaseQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredReleaseQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::with_capacity(8)),
            pending_count: AtomicU64::new(0),
        }
    }

    /// Queue a global handle for later deletion. Null handles are ignored.
    pub fn defer(&self, handle: RawHandle) {
        if handle.is_null() {
            return;
        }

        {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.push(handle);
            self.pending_count.fetch_add(1, Ordering::Release);
        }

        tracing::trace!("Deferred global release of {} (pending: {})", handle, self.len());
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.pending_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    /// Take every queued handle. The caller must be attached and delete them.
    pub fn drain(&self) -> Vec<RawHandle> {
        if !self.has_pending() {
            return Vec::new();
        }

        // Count and contents change together under the lock
        let handles = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let handles = std::mem::take(&mut *queue);
            self.pending_count
                .fetch_sub(handles.len() as u64, Ordering::Release);
            handles
        };

        if !handles.is_empty() {
            tracing::trace!("Draining {} deferred global releases", handles.len());
        }

        handles
    }
}

impl std::fmt::Debug for DeferredReleaseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredReleaseQueue")
            .field("pending_count", &self.len())
            .finish()
    }
}
