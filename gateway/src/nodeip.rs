// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Keeps the node IP dependent state of the gateway bridge converged: the tunnel
//! encapsulation address, the host masquerade address and the route towards OVN's
//! masquerade address.

use crate::locks::BridgeLock;
use crate::{BridgeLocks, GatewayError};
use config::consts::annotations::MASQUERADE_SUBNET;
use config::{GatewayConfig, GatewayMode, IpFamily, MasqueradeConfig};
use interface_manager::{IfAddr, Link, Manager, Netlink, RouteFilter};
use ipnet::IpNet;
use k8s_intf::annotations::MasqueradeSubnets;
use k8s_intf::{AnnotationChanges, NodeRecord, NodeStore};
use ovs::{Ovs, unquote};
use rekon::Create;
use routing::{RouteEntry, RouteManager};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const ENCAP_IP_KEY: &str = "external_ids:ovn-encap-ip";

pub struct NodeIpManager {
    node_name: String,
    bridge: String,
    families: Vec<IpFamily>,
    masquerade: MasqueradeConfig,
    fallback_addrs: Vec<IpNet>,
    program_masquerade: bool,
    set_encap_ip: bool,
    ovs: Ovs,
    netlink: Arc<dyn Netlink>,
    nodes: Arc<dyn NodeStore>,
    routes: Arc<RouteManager>,
    lock: BridgeLock,
}

impl NodeIpManager {
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        bridge: &str,
        ovs: Ovs,
        netlink: Arc<dyn Netlink>,
        nodes: Arc<dyn NodeStore>,
        routes: Arc<RouteManager>,
        locks: &BridgeLocks,
    ) -> Self {
        Self {
            node_name: config.node_name.clone(),
            bridge: bridge.to_string(),
            families: config.families(),
            masquerade: config.masquerade,
            fallback_addrs: config.interface_addrs.clone(),
            // on a DPU the masquerade address belongs to the host
            program_masquerade: config.mode != GatewayMode::Dpu,
            set_encap_ip: config.features.set_encap_ip,
            ovs,
            netlink,
            nodes,
            routes,
            lock: locks.for_bridge(bridge),
        }
    }

    #[must_use]
    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    /// Bring encapsulation address, masquerade address and route, and the masquerade
    /// subnet annotation in line with the node and the configuration.
    pub async fn sync(&self) -> Result<(), GatewayError> {
        let _guard = self.lock.lock().await;
        let node = self.nodes.get_node(&self.node_name).await?;
        if self.set_encap_ip {
            self.sync_encap_ip(&node).await?;
        }
        let link = self.netlink.link_by_name(&self.bridge).await?;
        self.remove_stale_masquerade(&node, &link).await?;
        if self.program_masquerade {
            self.program_masquerade(&link).await?;
        }
        self.publish_masquerade_subnets(&node).await
    }

    /// Set the encapsulation address to the node's internal IP (IPv4 preferred).
    /// Returns whether it changed.
    async fn sync_encap_ip(&self, node: &NodeRecord) -> Result<bool, GatewayError> {
        let Some(node_ip) = node
            .internal_ips
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| node.internal_ips.first())
        else {
            debug!("Node {} has no internal IP yet", self.node_name);
            return Ok(false);
        };
        let current = match self.ovs.vsctl(["get", "Open_vSwitch", ".", ENCAP_IP_KEY]).await {
            Ok(out) => unquote(&out).to_string(),
            Err(e) => {
                debug!("No encap IP set: {e}");
                String::new()
            }
        };
        let wanted = node_ip.to_string();
        if current == wanted {
            return Ok(false);
        }
        info!("Changing encap IP from '{current}' to {wanted}");
        let setting = format!("{ENCAP_IP_KEY}={wanted}");
        self.ovs
            .vsctl(["set", "Open_vSwitch", ".", setting.as_str()])
            .await?;
        self.ovs.restart_ovn_controller().await?;
        Ok(true)
    }

    /// Remove bridge addresses and routes left in a masquerade subnet the node used
    /// before.
    async fn remove_stale_masquerade(
        &self,
        node: &NodeRecord,
        link: &Link,
    ) -> Result<(), GatewayError> {
        let Some(value) = node.annotation(MASQUERADE_SUBNET) else {
            return Ok(());
        };
        let previous = match MasqueradeSubnets::from_annotation(value) {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Ignoring masquerade subnet annotation '{value}': {e}");
                return Ok(());
            }
        };
        let mut removed_routes = false;
        for family in &self.families {
            let Some(stale) = previous.get(*family).map(|net| net.trunc()) else {
                continue;
            };
            if stale == self.masquerade.subnet(*family).trunc() {
                continue;
            }
            info!("Removing stale masquerade subnet {stale} from {}", self.bridge);
            let addrs = self
                .netlink
                .addresses(Some(link.index), Some(*family))
                .await?;
            for addr in addrs.iter().filter(|a| stale.contains(&a.addr.addr())) {
                debug!("Removing stale address {} from {}", addr.addr, self.bridge);
                self.netlink.address_del(addr).await?;
            }
            let filter = RouteFilter {
                family: Some(*family),
                ..RouteFilter::link(link.index)
            };
            let routes = self.netlink.routes(&filter).await?;
            for route in routes.iter().filter(|r| stale.contains(&r.dst)) {
                debug!("Removing stale route {route}");
                self.netlink.route_del(route).await?;
                removed_routes = true;
            }
        }
        if removed_routes {
            debug!("Requesting a route pass after the masquerade cleanup on {}", self.bridge);
            self.routes.trigger();
        }
        Ok(())
    }

    async fn program_masquerade(&self, link: &Link) -> Result<(), GatewayError> {
        let addresses: Manager<IfAddr> = Manager::new(self.netlink.clone());
        for family in &self.families {
            let ips = self.masquerade.ips(*family);
            let host = IpNet::new(ips.host, ips.subnet.prefix_len())
                .map_err(|_| GatewayError::Missing("masquerade host address"))?;
            addresses.create(&IfAddr::new(link.index, host)).await?;

            let Some(node_ip) = self.node_ip(link, *family).await? else {
                warn!("No {family} node IP on {}, skipping masquerade route", self.bridge);
                continue;
            };
            let entry = RouteEntry {
                source: Some(node_ip),
                ..RouteEntry::new(IpFamily::host_net(ips.ovn), self.bridge.as_str())
            };
            self.routes.add(entry).await?;
        }
        Ok(())
    }

    /// The first global address of the bridge outside the masquerade subnet, or the
    /// configured interface address of the family.
    async fn node_ip(
        &self,
        link: &Link,
        family: IpFamily,
    ) -> Result<Option<IpAddr>, GatewayError> {
        let masquerade = self.masquerade.subnet(family);
        let found = self
            .netlink
            .addresses(Some(link.index), Some(family))
            .await?
            .into_iter()
            .map(|a| a.addr.addr())
            .find(|ip| !masquerade.contains(ip) && !is_link_local(ip));
        Ok(found.or_else(|| {
            self.fallback_addrs
                .iter()
                .find(|net| IpFamily::of_net(net) == family)
                .map(IpNet::addr)
        }))
    }

    async fn publish_masquerade_subnets(&self, node: &NodeRecord) -> Result<(), GatewayError> {
        let value =
            MasqueradeSubnets::from_config(&self.masquerade, &self.families).to_annotation()?;
        if node.annotation(MASQUERADE_SUBNET) == Some(value.as_str()) {
            return Ok(());
        }
        let changes = AnnotationChanges::from([(MASQUERADE_SUBNET.to_string(), Some(value))]);
        self.nodes.set_annotations(&self.node_name, &changes).await?;
        Ok(())
    }

    /// Sync every `interval` until `stop` is cancelled.
    pub async fn run(&self, stop: CancellationToken, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = stop.cancelled() => {
                    debug!("Stopping node IP syncs on {}", self.bridge);
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync().await {
                        error!("Node IP sync on {} failed: {e}", self.bridge);
                    }
                }
            }
        }
    }
}

pub(crate) fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_unicast_link_local(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::GatewayConfigBuilder;
    use exec::{Backoff, FakeExec};
    use interface_manager::{FakeNetlink, Route};
    use k8s_intf::MemoryNodeStore;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    const VSCTL: &str = "ovs-vsctl --timeout=15";

    struct Harness {
        kernel: Arc<FakeNetlink>,
        exec: Arc<FakeExec>,
        nodes: Arc<MemoryNodeStore>,
        routes: Arc<RouteManager>,
        locks: BridgeLocks,
    }

    impl Harness {
        fn new(node: NodeRecord) -> Self {
            let kernel = Arc::new(FakeNetlink::new());
            kernel.add_link("breth0", None);
            kernel.add_address("breth0", "192.168.1.10/24".parse().unwrap());
            Self {
                routes: Arc::new(RouteManager::new(kernel.clone())),
                kernel,
                exec: Arc::new(FakeExec::strict()),
                nodes: Arc::new(MemoryNodeStore::new().with_node(node)),
                locks: BridgeLocks::new(),
            }
        }

        fn manager(&self, mode: GatewayMode, set_encap_ip: bool) -> NodeIpManager {
            let mut cfg = GatewayConfigBuilder::default()
                .mode(mode)
                .node_name("node1")
                .host_subnets(vec!["10.1.1.0/24".parse().unwrap()])
                .build()
                .unwrap();
            cfg.features.set_encap_ip = set_encap_ip;
            NodeIpManager::new(
                &cfg,
                "breth0",
                Ovs::new(self.exec.clone(), Backoff::default()),
                self.kernel.clone(),
                self.nodes.clone(),
                self.routes.clone(),
                &self.locks,
            )
        }
    }

    fn node_with_ip() -> NodeRecord {
        NodeRecord {
            internal_ips: vec!["192.168.1.10".parse().unwrap()],
            ..NodeRecord::new("node1")
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_masquerade_programmed_and_published() {
        let harness = Harness::new(NodeRecord::new("node1"));
        let manager = harness.manager(GatewayMode::Shared, false);
        manager.sync().await.unwrap();

        assert!(
            harness
                .kernel
                .addresses_of("breth0")
                .contains(&"169.254.169.2/29".parse().unwrap())
        );
        let entries = harness.routes.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dst, "169.254.169.1/32".parse::<IpNet>().unwrap());
        assert_eq!(entries[0].source, Some("192.168.1.10".parse().unwrap()));
        assert_eq!(
            harness.nodes.node("node1").unwrap().annotation(MASQUERADE_SUBNET),
            Some(r#"{"ipv4":"169.254.169.0/29"}"#)
        );
        assert!(harness.exec.calls().is_empty());

        // nothing left to do the second time around
        manager.sync().await.unwrap();
        assert_eq!(harness.nodes.updates(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stale_masquerade_subnet_is_cleaned() {
        let mut node = NodeRecord::new("node1");
        node.annotations.insert(
            MASQUERADE_SUBNET.to_string(),
            r#"{"ipv4":"170.254.0.0/16","ipv6":"fa69::/112"}"#.to_string(),
        );
        let harness = Harness::new(node);
        let index = harness.kernel.index_of("breth0");
        harness
            .kernel
            .add_address("breth0", "170.254.0.2/32".parse().unwrap());
        harness
            .kernel
            .add_route(Route::new("170.254.0.1/32".parse().unwrap(), index));

        harness.manager(GatewayMode::Shared, false).sync().await.unwrap();

        assert_eq!(
            harness.kernel.addresses_of("breth0"),
            vec![
                "192.168.1.10/24".parse::<IpNet>().unwrap(),
                "169.254.169.2/29".parse().unwrap()
            ]
        );
        let dsts: Vec<IpNet> = harness.kernel.all_routes().iter().map(|r| r.dst).collect();
        assert_eq!(dsts, vec!["169.254.169.1/32".parse::<IpNet>().unwrap()]);
        assert!(logs_contain("Requesting a route pass after the masquerade cleanup"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_corrupt_annotation_means_nothing_stale() {
        let mut node = NodeRecord::new("node1");
        node.annotations
            .insert(MASQUERADE_SUBNET.to_string(), "{not json".to_string());
        let harness = Harness::new(node);
        let index = harness.kernel.index_of("breth0");
        harness
            .kernel
            .add_route(Route::new("170.254.0.1/32".parse().unwrap(), index));

        harness.manager(GatewayMode::Shared, false).sync().await.unwrap();
        assert!(
            harness
                .kernel
                .all_routes()
                .iter()
                .any(|r| r.dst == "170.254.0.1/32".parse::<IpNet>().unwrap())
        );
        assert_eq!(
            harness.nodes.node("node1").unwrap().annotation(MASQUERADE_SUBNET),
            Some(r#"{"ipv4":"169.254.169.0/29"}"#)
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_encap_ip_updated_and_controller_restarted() {
        let harness = Harness::new(node_with_ip());
        harness.exec.expect(
            &format!("{VSCTL} get Open_vSwitch . external_ids:ovn-encap-ip"),
            "\"10.0.0.1\"",
        );
        harness.exec.expect(
            &format!("{VSCTL} set Open_vSwitch . external_ids:ovn-encap-ip=192.168.1.10"),
            "",
        );
        harness
            .exec
            .expect("ovn-appctl --timeout=5 -t ovn-controller exit --restart", "");

        harness.manager(GatewayMode::Shared, true).sync().await.unwrap();
        assert!(harness.exec.called_matches_expected(), "{:?}", harness.exec.commands());
    }

    #[tokio::test]
    async fn test_encap_ip_unchanged_or_unknown() {
        let harness = Harness::new(node_with_ip());
        harness.exec.expect(
            &format!("{VSCTL} get Open_vSwitch . external_ids:ovn-encap-ip"),
            "\"192.168.1.10\"",
        );
        harness.manager(GatewayMode::Shared, true).sync().await.unwrap();
        assert!(harness.exec.called_matches_expected(), "{:?}", harness.exec.commands());

        // no internal IP: no commands at all
        let harness = Harness::new(NodeRecord::new("node1"));
        harness.manager(GatewayMode::Shared, true).sync().await.unwrap();
        assert!(harness.exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dpu_skips_masquerade() {
        let harness = Harness::new(NodeRecord::new("node1"));
        harness.manager(GatewayMode::Dpu, false).sync().await.unwrap();
        assert_eq!(
            harness.kernel.addresses_of("breth0"),
            vec!["192.168.1.10/24".parse::<IpNet>().unwrap()]
        );
        assert!(harness.routes.entries().await.is_empty());
        assert!(
            harness
                .nodes
                .node("node1")
                .unwrap()
                .annotation(MASQUERADE_SUBNET)
                .is_some()
        );
    }
}
