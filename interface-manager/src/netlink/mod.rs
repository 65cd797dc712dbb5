// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The kernel seam.

#[cfg(any(test, feature = "testing"))]
mod fake;
mod rtnl;

#[cfg(any(test, feature = "testing"))]
pub use fake::FakeNetlink;
pub use rtnl::RtNetlink;

use crate::Mac;
use async_trait::async_trait;
use config::IpFamily;
use config::consts::MAIN_ROUTE_TABLE;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
pub enum NetlinkError {
    #[error("Link '{0}' not found")]
    LinkNotFound(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    Exists(String),
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("Netlink request failed: {0}")]
    Rtnetlink(#[from] rtnetlink::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to switch network namespace: {0}")]
    Netns(#[from] nix::Error),
}

/// A network interface as seen by the kernel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub index: u32,
    pub name: String,
    pub mac: Option<Mac>,
    pub mtu: u32,
    pub up: bool,
}

/// An address assigned to an interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IfAddr {
    pub link_index: u32,
    pub addr: IpNet,
}

impl IfAddr {
    #[must_use]
    pub fn new(link_index: u32, addr: IpNet) -> Self {
        Self { link_index, addr }
    }

    #[must_use]
    pub fn family(&self) -> IpFamily {
        IpFamily::of_net(&self.addr)
    }
}

/// A unicast route bound to an output interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub dst: IpNet,
    pub link_index: u32,
    pub gateway: Option<IpAddr>,
    /// Preferred source address (`src` in `ip route`)
    pub source: Option<IpAddr>,
    pub mtu: Option<u32>,
    pub table: u32,
}

impl Route {
    #[must_use]
    pub fn new(dst: IpNet, link_index: u32) -> Self {
        Self {
            dst: dst.trunc(),
            link_index,
            gateway: None,
            source: None,
            mtu: None,
            table: MAIN_ROUTE_TABLE,
        }
    }

    #[must_use]
    pub fn family(&self) -> IpFamily {
        IpFamily::of_net(&self.dst)
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.dst.prefix_len() == 0
    }

    /// Gateway and source must belong to the destination's family.
    pub fn check_families(&self) -> Result<(), NetlinkError> {
        let family = self.family();
        for addr in self.gateway.iter().chain(self.source.iter()) {
            if IpFamily::of(addr) != family {
                return Err(NetlinkError::Invalid(format!(
                    "{addr} does not match the family of {}",
                    self.dst
                )));
            }
        }
        Ok(())
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} dev #{}", self.dst, self.link_index)?;
        if let Some(gw) = self.gateway {
            write!(f, " via {gw}")?;
        }
        if let Some(src) = self.source {
            write!(f, " src {src}")?;
        }
        if let Some(mtu) = self.mtu {
            write!(f, " mtu {mtu}")?;
        }
        write!(f, " table {}", self.table)
    }
}

/// A policy routing rule of the `fwmark <mark> lookup <table>` kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub family: IpFamily,
    pub fwmark: Option<u32>,
    pub table: u32,
    pub priority: u32,
}

/// Selects routes in a dump.  Unset fields match everything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteFilter {
    pub family: Option<IpFamily>,
    pub table: Option<u32>,
    pub link_index: Option<u32>,
    pub dst: Option<IpNet>,
}

impl RouteFilter {
    /// Default routes of `family` in the main table
    #[must_use]
    pub fn default_route(family: IpFamily) -> Self {
        let dst = match family {
            IpFamily::V4 => IpNet::V4(ipnet::Ipv4Net::default()),
            IpFamily::V6 => IpNet::V6(ipnet::Ipv6Net::default()),
        };
        Self {
            family: Some(family),
            table: Some(MAIN_ROUTE_TABLE),
            link_index: None,
            dst: Some(dst),
        }
    }

    #[must_use]
    pub fn link(link_index: u32) -> Self {
        Self {
            link_index: Some(link_index),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, route: &Route) -> bool {
        self.family.is_none_or(|f| f == route.family())
            && self.table.is_none_or(|t| t == route.table)
            && self.link_index.is_none_or(|l| l == route.link_index)
            && self.dst.is_none_or(|d| d.trunc() == route.dst)
    }
}

/// Kernel operations used by the gateway.  Object safe so that components can hold an
/// `Arc<dyn Netlink>`.
#[async_trait]
pub trait Netlink: Send + Sync {
    async fn links(&self) -> Result<Vec<Link>, NetlinkError>;
    /// Fails with [`NetlinkError::LinkNotFound`] when there is no such link
    async fn link_by_name(&self, name: &str) -> Result<Link, NetlinkError>;
    async fn link_by_index(&self, index: u32) -> Result<Link, NetlinkError>;
    async fn link_set_up(&self, index: u32) -> Result<(), NetlinkError>;
    async fn link_set_mac(&self, index: u32, mac: Mac) -> Result<(), NetlinkError>;

    async fn addresses(
        &self,
        link_index: Option<u32>,
        family: Option<IpFamily>,
    ) -> Result<Vec<IfAddr>, NetlinkError>;
    /// Fails with [`NetlinkError::Exists`] if the address is already present
    async fn address_add(&self, addr: &IfAddr) -> Result<(), NetlinkError>;
    async fn address_del(&self, addr: &IfAddr) -> Result<(), NetlinkError>;

    async fn routes(&self, filter: &RouteFilter) -> Result<Vec<Route>, NetlinkError>;
    /// Create the route, or replace the route with the same destination and table
    async fn route_replace(&self, route: &Route) -> Result<(), NetlinkError>;
    async fn route_del(&self, route: &Route) -> Result<(), NetlinkError>;

    async fn rules(&self, family: IpFamily) -> Result<Vec<Rule>, NetlinkError>;
    async fn rule_add(&self, rule: &Rule) -> Result<(), NetlinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_filter_matching() {
        let mut route = Route::new("0.0.0.0/0".parse().unwrap(), 2);
        route.gateway = Some("192.168.1.1".parse().unwrap());
        assert!(RouteFilter::default_route(IpFamily::V4).matches(&route));
        assert!(!RouteFilter::default_route(IpFamily::V6).matches(&route));
        assert!(RouteFilter::link(2).matches(&route));
        assert!(!RouteFilter::link(3).matches(&route));

        route.table = 7;
        assert!(!RouteFilter::default_route(IpFamily::V4).matches(&route));
    }

    #[test]
    fn route_family_check() {
        let mut route = Route::new("10.96.0.0/16".parse().unwrap(), 2);
        route.source = Some("fd69::2".parse().unwrap());
        assert!(route.check_families().is_err());
        route.source = Some("169.254.169.2".parse().unwrap());
        assert!(route.check_families().is_ok());
    }
}
