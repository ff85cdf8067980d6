//! Reference lifetime primitives.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Registry                                                   │
//! │  ├── attach_current_thread() (idempotent, flushes queue)    │
//! │  ├── acquire_global / duplicate_local / release             │
//! │  └── with_scope(body) → FrameGuard                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  GlobalRef (RAII)                                           │
//! │  ├── Owns exactly one global handle                         │
//! │  ├── release() swaps the handle out, so it deletes once     │
//! │  └── Drop on an unattached thread → DeferredReleaseQueue    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  DeferredReleaseQueue                                       │
//! │  ├── Thread-safe queue of global handles                    │
//! │  └── Drained on the next attached registry operation        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  FrameGuard (RAII)                                          │
//! │  ├── push_local_frame on construction                       │
//! │  └── pop_local_frame on drop (success, error or unwind)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod deferred_release;
mod global;
mod scope;

pub use deferred_release::DeferredReleaseQueue;
pub use global::{GlobalRef, LocalRef};
pub(crate) use scope::{FrameGuard, run_in_frame};

#[cfg(test)]
mod tests;
