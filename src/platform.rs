//! Process-wide registry.
//!
//! A process talks to one remote runtime. This module keeps the shared
//! [`Registry`] for code that has no other way to reach it, such as callbacks
//! arriving from the remote side.

use std::sync::OnceLock;

use crate::error::{BridgeError, Result};
use crate::registry::Registry;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Install the process-wide registry. The first install wins; later calls
/// return the registry already installed and drop theirs.
pub fn install(registry: Registry) -> &'static Registry {
    let installed = REGISTRY.get_or_init(|| registry.clone());

    if !installed.ptr_eq(&registry) {
        log::debug!("Process registry already installed; ignoring new one");
    }

    installed
}

/// Get the process-wide registry, initializing it with `init` if necessary.
///
/// If two threads race, both may run `init`; only one result is kept.
pub fn get_or_install(init: impl FnOnce() -> Result<Registry>) -> Result<&'static Registry> {
    if let Some(registry) = REGISTRY.get() {
        return Ok(registry);
    }

    Ok(install(init()?))
}

/// The installed registry.
pub fn registry() -> Result<&'static Registry> {
    REGISTRY
        .get()
        .ok_or_else(|| BridgeError::Config("no process registry installed".into()))
}

pub fn is_installed() -> bool {
    REGISTRY.get().is_some()
}
