// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::RouteError;
use config::IpFamily;
use config::consts::MAIN_ROUTE_TABLE;
use derive_builder::Builder;
use interface_manager::Route;
use ipnet::IpNet;
use std::fmt::Display;
use std::net::IpAddr;

/// A route the gateway wants in the kernel.  The link is named, not indexed, since
/// links come and go (the uplink being replaced by a bridge, for instance).
#[derive(Builder, Clone, Debug, PartialEq, Eq)]
#[builder(build_fn(validate = "Self::check"))]
pub struct RouteEntry {
    #[builder(setter(custom))]
    pub dst: IpNet,
    #[builder(setter(into))]
    pub link: String,
    #[builder(setter(strip_option), default)]
    pub gateway: Option<IpAddr>,
    #[builder(setter(strip_option), default)]
    pub source: Option<IpAddr>,
    #[builder(setter(strip_option), default)]
    pub mtu: Option<u32>,
    #[builder(default = MAIN_ROUTE_TABLE)]
    pub table: u32,
}

/// Identity of a [`RouteEntry`]: a newer entry with the same key replaces the older.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub dst: IpNet,
    pub link: String,
    pub table: u32,
}

impl RouteEntryBuilder {
    pub fn dst(&mut self, dst: IpNet) -> &mut Self {
        self.dst = Some(dst.trunc());
        self
    }

    fn check(&self) -> Result<(), String> {
        if let Some(dst) = &self.dst {
            let family = IpFamily::of_net(dst);
            for addr in [self.gateway, self.source].into_iter().flatten().flatten() {
                if IpFamily::of(&addr) != family {
                    return Err(format!("{addr} does not match the family of {dst}"));
                }
            }
        }
        Ok(())
    }
}

impl RouteEntry {
    /// A route to `dst` out of `link` in the main table
    #[must_use]
    pub fn new(dst: IpNet, link: impl Into<String>) -> Self {
        Self {
            dst: dst.trunc(),
            link: link.into(),
            gateway: None,
            source: None,
            mtu: None,
            table: MAIN_ROUTE_TABLE,
        }
    }

    #[must_use]
    pub fn key(&self) -> RouteKey {
        RouteKey {
            dst: self.dst,
            link: self.link.clone(),
            table: self.table,
        }
    }

    #[must_use]
    pub fn family(&self) -> IpFamily {
        IpFamily::of_net(&self.dst)
    }

    pub fn validate(&self) -> Result<(), RouteError> {
        for addr in self.gateway.iter().chain(self.source.iter()) {
            if IpFamily::of(addr) != self.family() {
                return Err(RouteError::FamilyMismatch(self.dst, *addr));
            }
        }
        Ok(())
    }

    /// The kernel route for this entry, once its link is known
    #[must_use]
    pub fn to_route(&self, link_index: u32) -> Route {
        Route {
            dst: self.dst,
            link_index,
            gateway: self.gateway,
            source: self.source,
            mtu: self.mtu,
            table: self.table,
        }
    }
}

impl Display for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} dev {}", self.dst, self.link)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_normalizes_and_checks_families() {
        let entry = RouteEntryBuilder::default()
            .dst("10.96.1.7/16".parse().unwrap())
            .link("breth0")
            .gateway("169.254.169.4".parse().unwrap())
            .mtu(1400)
            .build()
            .unwrap();
        assert_eq!(entry.dst, "10.96.0.0/16".parse::<IpNet>().unwrap());
        assert_eq!(entry.table, MAIN_ROUTE_TABLE);
        assert_eq!(
            entry.to_string(),
            "10.96.0.0/16 dev breth0 via 169.254.169.4 mtu 1400 table 254"
        );

        let bad = RouteEntryBuilder::default()
            .dst("10.96.0.0/16".parse().unwrap())
            .link("breth0")
            .source("fd69::2".parse().unwrap())
            .build();
        assert!(bad.is_err());
    }

    #[test]
    fn identity_ignores_attributes() {
        let mut a = RouteEntry::new("169.254.169.1/32".parse().unwrap(), "breth0");
        let b = a.clone();
        a.source = Some("192.168.1.10".parse().unwrap());
        assert_eq!(a.key(), b.key());
        assert!(a.validate().is_ok());
        a.gateway = Some("fd69::1".parse().unwrap());
        assert!(matches!(a.validate(), Err(RouteError::FamilyMismatch(_, _))));
    }
}
