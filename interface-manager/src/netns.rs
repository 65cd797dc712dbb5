// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Scoped entry into a network namespace.

use crate::NetlinkError;
use nix::sched::{CloneFlags, setns};
use std::fs::File;
use std::path::Path;
use tracing::{debug, error};

const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Moves the current thread into a network namespace and moves it back on drop.
///
/// Namespaces are per thread: the guard must not be held across an `.await`.
#[must_use = "the namespace is left as soon as the guard is dropped"]
pub struct NetnsGuard {
    original: File,
}

impl NetnsGuard {
    pub fn enter(path: &Path) -> Result<Self, NetlinkError> {
        let original = File::open(THREAD_NETNS)?;
        let target = File::open(path)?;
        setns(&target, CloneFlags::CLONE_NEWNET)?;
        debug!("Entered network namespace {}", path.display());
        Ok(Self { original })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(&self.original, CloneFlags::CLONE_NEWNET) {
            error!("Failed to restore the original network namespace: {e}");
        }
    }
}

/// Run `f` inside the namespace at `path`, always coming back afterwards.
pub fn in_netns<T>(path: &Path, f: impl FnOnce() -> T) -> Result<T, NetlinkError> {
    let _guard = NetnsGuard::enter(path)?;
    Ok(f())
}
