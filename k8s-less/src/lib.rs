// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Support for k8s-less mode where node records live in local files

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod local;

pub use local::FileNodeStore;

use tracectl::trace_target;
trace_target!("k8s-less", LevelFilter::INFO, &["management"]);
