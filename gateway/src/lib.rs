// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The per-node gateway controller.
//!
//! An [`AnyGateway`] is built from the node's [`config::GatewayConfig`] and a set of
//! [`GatewayDeps`].  It then goes through `init_func` (discover or create the bridge,
//! rules, routes and flows), `init` (publish the node annotations) and `start` (launch
//! the background syncs).

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod bridged;
mod controller;
mod deps;
mod dpu_host;
mod errors;
pub mod itp;
mod locks;
mod nodeip;
mod resolver;

pub use bridged::BridgeGateway;
pub use controller::{AnyGateway, GatewayState};
pub use deps::GatewayDeps;
pub use dpu_host::{DpuHostGateway, dpu_host_routes, primary_address};
pub use errors::{GatewayError, ResolveError};
pub use locks::BridgeLocks;
pub use nodeip::NodeIpManager;
pub use resolver::{NextHopResolver, Resolved};

use tracectl::trace_target;
trace_target!("gateway", LevelFilter::INFO, &["gateway", "masquerade"]);
