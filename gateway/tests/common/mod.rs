// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![allow(dead_code)]

use exec::{Backoff, FakeExec};
use hardware::FakeSriov;
use interface_manager::FakeNetlink;
use k8s_intf::{MemoryNodeStore, NodeRecord};
use nodegw_gateway::{BridgeLocks, GatewayDeps};
use routing::RouteManager;
use rules::{FakeIptables, FakeNftables};
use std::sync::Arc;
use std::time::Duration;

pub const VSCTL: &str = "ovs-vsctl --timeout=15";
pub const CHASSIS: &str = "cb9ec8fa-b409-4ef3-9f42-d9283c47aac6";

/// Everything a gateway touches, faked
pub struct FakeNode {
    pub exec: Arc<FakeExec>,
    pub kernel: Arc<FakeNetlink>,
    pub nodes: Arc<MemoryNodeStore>,
    pub nft: Arc<FakeNftables>,
    pub ipt: Arc<FakeIptables>,
    pub sriov: Arc<FakeSriov>,
    pub routes: Arc<RouteManager>,
    pub locks: BridgeLocks,
}

impl FakeNode {
    pub fn new(exec: FakeExec, record: NodeRecord) -> Self {
        let kernel = Arc::new(FakeNetlink::new());
        Self {
            exec: Arc::new(exec),
            routes: Arc::new(RouteManager::new(kernel.clone())),
            kernel,
            nodes: Arc::new(MemoryNodeStore::new().with_node(record)),
            nft: Arc::new(FakeNftables::new()),
            ipt: Arc::new(FakeIptables::new()),
            sriov: Arc::new(FakeSriov::new()),
            locks: BridgeLocks::new(),
        }
    }

    pub fn deps(&self) -> GatewayDeps {
        GatewayDeps {
            exec: self.exec.clone(),
            netlink: self.kernel.clone(),
            nodes: self.nodes.clone(),
            nftables: self.nft.clone(),
            iptables: self.ipt.clone(),
            sriov: self.sriov.clone(),
            routes: self.routes.clone(),
            backoff: Backoff {
                attempts: 2,
                initial: Duration::from_millis(1),
                max: Duration::from_millis(1),
            },
            bridge_locks: self.locks.clone(),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<String> {
        self.nodes
            .node("node1")
            .and_then(|n| n.annotation(key).map(ToString::to_string))
    }
}

/// Bridge discovery commands following the bridge lookup or creation
pub fn expect_discovery_tail(
    exec: &FakeExec,
    bridge: &str,
    mac: &str,
    uplink: Option<&str>,
    hw_offload: bool,
) {
    exec.expect(&format!("sysctl -w net.ipv4.conf.{bridge}.forwarding=1"), "");
    exec.expect(
        &format!("{VSCTL} --if-exists get interface {bridge} mac_in_use"),
        &format!("\"{mac}\""),
    );
    exec.expect(
        &format!("{VSCTL} --if-exists get Open_vSwitch . external_ids:ovn-bridge-mappings"),
        "",
    );
    exec.expect(
        &format!("{VSCTL} set Open_vSwitch . external_ids:ovn-bridge-mappings=physnet:{bridge}"),
        "",
    );
    exec.expect(
        &format!("{VSCTL} --if-exists get Open_vSwitch . external_ids:system-id"),
        CHASSIS,
    );
    exec.expect(
        &format!("ovs-appctl --timeout=15 dpif/show-dp-features {bridge}"),
        "Check pkt length action: Yes",
    );
    exec.expect(
        &format!("{VSCTL} --if-exists get Open_vSwitch . other_config:hw-offload"),
        if hw_offload { "\"true\"" } else { "" },
    );
    exec.expect(
        &format!("{VSCTL} get Interface patch-{bridge}_node1-to-br-int ofport"),
        "5",
    );
    if let Some(uplink) = uplink {
        exec.expect(&format!("{VSCTL} get interface {uplink} ofport"), "7");
    }
}
