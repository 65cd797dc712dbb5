// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Long-lived owner of the kernel routes the gateway depends on.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod entry;
mod errors;
mod manager;

pub use entry::{RouteEntry, RouteEntryBuilder, RouteKey};
pub use errors::RouteError;
pub use manager::RouteManager;

use tracectl::trace_target;
trace_target!("routing", LevelFilter::INFO, &["routes", "kernel"]);
