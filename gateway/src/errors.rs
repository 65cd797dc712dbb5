// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::GatewayState;
use config::ConfigError;
use exec::ExecError;
use interface_manager::NetlinkError;
use k8s_intf::StoreError;
use ovs::OvsError;
use routing::RouteError;
use rules::RulesError;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Gateway interface mismatch: configured {configured}, default route uses {found}")]
    GatewayInterfaceMismatch { configured: String, found: String },
    #[error("No gateway interface configured and no default route found")]
    NoGatewayInterface,
    #[error("No interface carries address {0}")]
    NoInterfaceForIp(IpAddr),
    #[error(transparent)]
    Netlink(#[from] NetlinkError),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Ovs(#[from] OvsError),
    #[error(transparent)]
    Netlink(#[from] NetlinkError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("Can't {op} a gateway in state {state}")]
    State { op: &'static str, state: GatewayState },
    #[error("Node IP {0} is not inside any subnet of its interface")]
    NodeIpNotInSubnet(IpAddr),
    #[error("Missing {0}")]
    Missing(&'static str),
}
