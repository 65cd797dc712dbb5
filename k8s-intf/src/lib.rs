// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Access to the Kubernetes node object of the gateway's node.
//!
//! The gateway only ever reads its node record (addresses and annotations) and writes
//! annotations.  Both go through the [`NodeStore`] trait: [`KubeNodeStore`] (feature
//! `client`) talks to the API server, `MemoryNodeStore` (feature `testing`) keeps
//! records in memory, and the `k8s-less` crate keeps them in a file.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod annotations;
#[cfg(feature = "client")]
mod client;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod store;

#[cfg(feature = "client")]
pub use client::KubeNodeStore;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryNodeStore;
pub use store::{AnnotationChanges, NodeRecord, NodeStore, StoreError};

use tracectl::trace_target;
trace_target!("k8s-intf", LevelFilter::INFO, &["management", "annotations"]);
