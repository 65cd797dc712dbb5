// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! In-memory kernel model for tests.

use super::{IfAddr, Link, Netlink, NetlinkError, Route, RouteFilter, Rule};
use crate::Mac;
use async_trait::async_trait;
use config::IpFamily;
use ipnet::IpNet;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Default)]
struct KernelState {
    next_index: u32,
    links: BTreeMap<u32, Link>,
    addresses: Vec<IfAddr>,
    routes: Vec<Route>,
    rules: Vec<Rule>,
    fail_route_dumps: bool,
}

/// A fake kernel.  Routes are keyed like the kernel keys them: a replace overwrites
/// any route with the same destination and table.
#[derive(Default)]
pub struct FakeNetlink {
    state: Mutex<KernelState>,
}

impl FakeNetlink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a link (down) and return its index
    pub fn add_link(&self, name: &str, mac: Option<Mac>) -> u32 {
        let mut state = self.state.lock();
        state.next_index += 1;
        let index = state.next_index;
        state.links.insert(
            index,
            Link {
                index,
                name: name.to_string(),
                mac,
                mtu: 1500,
                up: false,
            },
        );
        index
    }

    /// Assign an address to the named link.
    ///
    /// # Panics
    /// If the link does not exist.
    pub fn add_address(&self, link: &str, addr: IpNet) {
        let index = self.index_of(link);
        self.state.lock().addresses.push(IfAddr::new(index, addr));
    }

    /// Install a route as if somebody else had created it.
    pub fn add_route(&self, route: Route) {
        self.state.lock().routes.push(route);
    }

    /// Make every route dump fail until reset
    pub fn fail_route_dumps(&self, fail: bool) {
        self.state.lock().fail_route_dumps = fail;
    }

    /// # Panics
    /// If the link does not exist.
    #[must_use]
    pub fn index_of(&self, name: &str) -> u32 {
        self.link(name).map(|l| l.index).unwrap_or_else(|| panic!("no link {name}"))
    }

    #[must_use]
    pub fn link(&self, name: &str) -> Option<Link> {
        self.state
            .lock()
            .links
            .values()
            .find(|l| l.name == name)
            .cloned()
    }

    /// Addresses of the named link, in insertion order
    #[must_use]
    pub fn addresses_of(&self, name: &str) -> Vec<IpNet> {
        let Some(link) = self.link(name) else {
            return vec![];
        };
        self.state
            .lock()
            .addresses
            .iter()
            .filter(|a| a.link_index == link.index)
            .map(|a| a.addr)
            .collect()
    }

    #[must_use]
    pub fn all_routes(&self) -> Vec<Route> {
        self.state.lock().routes.clone()
    }

    #[must_use]
    pub fn all_rules(&self) -> Vec<Rule> {
        self.state.lock().rules.clone()
    }

    fn check_link(state: &KernelState, index: u32) -> Result<(), NetlinkError> {
        if state.links.contains_key(&index) {
            Ok(())
        } else {
            Err(NetlinkError::LinkNotFound(format!("#{index}")))
        }
    }
}

#[async_trait]
impl Netlink for FakeNetlink {
    async fn links(&self) -> Result<Vec<Link>, NetlinkError> {
        Ok(self.state.lock().links.values().cloned().collect())
    }

    async fn link_by_name(&self, name: &str) -> Result<Link, NetlinkError> {
        self.link(name)
            .ok_or_else(|| NetlinkError::LinkNotFound(name.to_string()))
    }

    async fn link_by_index(&self, index: u32) -> Result<Link, NetlinkError> {
        self.state
            .lock()
            .links
            .get(&index)
            .cloned()
            .ok_or_else(|| NetlinkError::LinkNotFound(format!("#{index}")))
    }

    async fn link_set_up(&self, index: u32) -> Result<(), NetlinkError> {
        let mut state = self.state.lock();
        let link = state
            .links
            .get_mut(&index)
            .ok_or_else(|| NetlinkError::LinkNotFound(format!("#{index}")))?;
        link.up = true;
        Ok(())
    }

    async fn link_set_mac(&self, index: u32, mac: Mac) -> Result<(), NetlinkError> {
        let mut state = self.state.lock();
        let link = state
            .links
            .get_mut(&index)
            .ok_or_else(|| NetlinkError::LinkNotFound(format!("#{index}")))?;
        link.mac = Some(mac);
        Ok(())
    }

    async fn addresses(
        &self,
        link_index: Option<u32>,
        family: Option<IpFamily>,
    ) -> Result<Vec<IfAddr>, NetlinkError> {
        Ok(self
            .state
            .lock()
            .addresses
            .iter()
            .filter(|a| link_index.is_none_or(|i| i == a.link_index))
            .filter(|a| family.is_none_or(|f| f == a.family()))
            .copied()
            .collect())
    }

    async fn address_add(&self, addr: &IfAddr) -> Result<(), NetlinkError> {
        let mut state = self.state.lock();
        Self::check_link(&state, addr.link_index)?;
        if state.addresses.contains(addr) {
            return Err(NetlinkError::Exists(addr.addr.to_string()));
        }
        state.addresses.push(*addr);
        Ok(())
    }

    async fn address_del(&self, addr: &IfAddr) -> Result<(), NetlinkError> {
        let mut state = self.state.lock();
        let before = state.addresses.len();
        state.addresses.retain(|a| a != addr);
        if state.addresses.len() == before {
            return Err(NetlinkError::NotFound(addr.addr.to_string()));
        }
        // the kernel flushes routes whose preferred source just went away
        let gone = addr.addr.addr();
        state.routes.retain(|r| r.source != Some(gone));
        Ok(())
    }

    async fn routes(&self, filter: &RouteFilter) -> Result<Vec<Route>, NetlinkError> {
        let state = self.state.lock();
        if state.fail_route_dumps {
            return Err(NetlinkError::Io(std::io::Error::other("route dump failed")));
        }
        Ok(state
            .routes
            .iter()
            .filter(|r| filter.matches(r))
            .copied()
            .collect())
    }

    async fn route_replace(&self, route: &Route) -> Result<(), NetlinkError> {
        route.check_families()?;
        let mut state = self.state.lock();
        Self::check_link(&state, route.link_index)?;
        state
            .routes
            .retain(|r| !(r.dst == route.dst && r.table == route.table));
        state.routes.push(*route);
        Ok(())
    }

    async fn route_del(&self, route: &Route) -> Result<(), NetlinkError> {
        let mut state = self.state.lock();
        let before = state.routes.len();
        state.routes.retain(|r| {
            !(r.dst == route.dst && r.table == route.table && r.link_index == route.link_index)
        });
        if state.routes.len() == before {
            return Err(NetlinkError::NotFound(route.to_string()));
        }
        Ok(())
    }

    async fn rules(&self, family: IpFamily) -> Result<Vec<Rule>, NetlinkError> {
        Ok(self
            .state
            .lock()
            .rules
            .iter()
            .filter(|r| r.family == family)
            .copied()
            .collect())
    }

    async fn rule_add(&self, rule: &Rule) -> Result<(), NetlinkError> {
        let mut state = self.state.lock();
        if state.rules.contains(rule) {
            return Err(NetlinkError::Exists(format!("rule prio {}", rule.priority)));
        }
        state.rules.push(*rule);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_replace_overwrites_same_destination() {
        let kernel = FakeNetlink::new();
        let eth0 = kernel.add_link("eth0", None);
        let eth1 = kernel.add_link("eth1", None);

        let mut route = Route::new("10.96.0.0/16".parse().unwrap(), eth0);
        kernel.route_replace(&route).await.unwrap();
        route.link_index = eth1;
        kernel.route_replace(&route).await.unwrap();
        assert_eq!(kernel.all_routes(), vec![route]);

        let missing = Route::new("10.97.0.0/16".parse().unwrap(), 42);
        assert!(matches!(
            kernel.route_replace(&missing).await,
            Err(NetlinkError::LinkNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_address_lifecycle() {
        let kernel = FakeNetlink::new();
        let eth0 = kernel.add_link("eth0", None);
        let addr = IfAddr::new(eth0, "192.168.1.10/24".parse().unwrap());
        kernel.address_add(&addr).await.unwrap();
        assert!(matches!(
            kernel.address_add(&addr).await,
            Err(NetlinkError::Exists(_))
        ));
        assert_eq!(
            kernel.addresses(None, Some(IpFamily::V6)).await.unwrap(),
            vec![]
        );
        kernel.address_del(&addr).await.unwrap();
        assert!(kernel.addresses_of("eth0").is_empty());
    }
}
