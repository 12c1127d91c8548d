//! Platform-specific directories for the tunnel session store.
//!
//! Every function returns `None` if the platform doesn't expose the underlying directory,
//! e.g. when `$HOME` is not set.

use anyhow::{Context as _, Result};
use std::path::PathBuf;

#[cfg(any(target_os = "linux", target_os = "android"))]
#[path = "linux.rs"]
mod platform;

#[cfg(target_os = "macos")]
#[path = "macos.rs"]
mod platform;

#[cfg(target_os = "windows")]
#[path = "windows.rs"]
mod platform;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "windows"
)))]
mod platform {
    use std::path::PathBuf;

    pub fn session() -> Option<PathBuf> {
        None
    }

    pub fn logs() -> Option<PathBuf> {
        None
    }
}

pub use platform::{logs, session};

pub const BUNDLE_ID: &str = "dev.firezone.client";

/// Name of the sub-directory of [`session`] that holds the tunnel store.
const TUNNEL_STORE_DIR: &str = "tunnel";

/// e.g. `/home/alice/.local/share/dev.firezone.client/data/tunnel`
///
/// One file per store key lives in here, all of them written with `atomicwrites`.
pub fn tunnel_store() -> Option<PathBuf> {
    Some(session()?.join(TUNNEL_STORE_DIR))
}

/// Like [`tunnel_store`] but fails with a readable error if the directory is unknown.
pub fn tunnel_store_or_err() -> Result<PathBuf> {
    tunnel_store().context("Failed to compute path for tunnel store directory")
}
