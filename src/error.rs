//! Error taxonomy for the bridge.
//!
//! Every fallible operation returns [`BridgeError`]. Cleanup paths (handle
//! deletion, argument disposal) never surface these; they log and move on.

use thiserror::Error;

use crate::native::RawHandle;

/// Errors raised while crossing the boundary into the remote runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The remote runtime reports that the handle no longer refers to a live object.
    #[error("invalid or stale remote handle {0}")]
    InvalidHandle(RawHandle),

    /// A local value of this type has no remote representation.
    #[error("cannot marshal value of type `{0}` across the bridge")]
    UnsupportedMarshalType(String),

    /// A value crossed the boundary with a different kind than expected.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// The calling thread never attached to the remote runtime.
    #[error("current thread is not attached to the remote runtime")]
    NotAttached,

    #[error("class `{0}` not found")]
    ClassNotFound(String),

    #[error("method `{name}{signature}` not found on `{class}`")]
    MethodNotFound {
        class: String,
        name: String,
        signature: String,
    },

    #[error("field `{name}: {signature}` not found on `{class}`")]
    FieldNotFound {
        class: String,
        name: String,
        signature: String,
    },

    #[error("malformed type signature `{0}`")]
    InvalidSignature(String),

    /// The remote runtime ran out of reference slots or heap.
    #[error("remote runtime resources exhausted: {0}")]
    ResourceExhausted(String),

    /// The remote side raised while executing a call.
    #[error("remote exception: {0}")]
    RemoteException(String),

    /// `pop_local_frame` was called with no pushed frame.
    #[error("no local reference frame to pop")]
    FrameUnderflow,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
