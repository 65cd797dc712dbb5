// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type BridgeLock = Arc<tokio::sync::Mutex<()>>;

/// Locks serializing node IP syncs, one per bridge.  Clones share the same locks.
#[derive(Clone, Debug, Default)]
pub struct BridgeLocks(Arc<Mutex<HashMap<String, BridgeLock>>>);

impl BridgeLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock of `bridge`.  Every caller asking for the same bridge gets the same lock.
    pub(crate) fn for_bridge(&self, bridge: &str) -> BridgeLock {
        self.0.lock().entry(bridge.to_string()).or_default().clone()
    }
}
