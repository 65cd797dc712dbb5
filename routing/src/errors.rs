// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use interface_manager::NetlinkError;
use ipnet::IpNet;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Address {1} does not match the family of route destination {0}")]
    FamilyMismatch(IpNet, IpAddr),
    #[error("Link '{0}' of route to {1} not found")]
    LinkNotFound(String, IpNet),
    #[error("Failed to apply route to {0}: {1}")]
    Apply(IpNet, NetlinkError),
    #[error(transparent)]
    Netlink(#[from] NetlinkError),
    #[error("{0} of {1} routes failed to apply")]
    Incomplete(usize, usize),
}
