// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! SR-IOV representor discovery.
//!
//! On a DPU the host's PCI physical function is visible as a representor netdev.  The
//! gateway needs to tell such representors apart from VF and uplink representors and
//! to learn the MAC address the host side of the function uses.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod devlink;
#[cfg(any(test, feature = "testing"))]
mod fake;

pub use devlink::{DevlinkSriov, HardwareError, PortFlavour, Sriov};
#[cfg(any(test, feature = "testing"))]
pub use fake::FakeSriov;

use tracectl::trace_target;
trace_target!("hardware", LevelFilter::INFO, &["sriov"]);
