// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Open vSwitch plumbing for the gateway bridge.
//!
//! * [`Ovs`] wraps the `ovs-vsctl`, `ovs-appctl`, `ovs-ofctl` and `ovn-appctl` tools.
//! * [`BridgeProvisioner`] creates or adopts the gateway bridge and gathers
//!   [`BridgeInfo`].
//! * [`OpenFlowManager`] owns the flow table of the gateway bridge.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod bridge;
mod errors;
mod flows;
mod openflow;
mod vsctl;

pub use bridge::{BridgeInfo, BridgeProvisioner, HostRepresentor};
pub use errors::OvsError;
pub use flows::{FlowInputs, build_flows};
pub use openflow::OpenFlowManager;
pub use vsctl::{Ovs, unquote};

use tracectl::trace_target;
trace_target!("ovs", LevelFilter::INFO, &["openflow", "bridge"]);
