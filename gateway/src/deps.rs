// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::BridgeLocks;
use exec::{Backoff, Exec};
use hardware::Sriov;
use interface_manager::Netlink;
use k8s_intf::NodeStore;
use ovs::Ovs;
use routing::RouteManager;
use rules::{Iptables, Nftables};
use std::sync::Arc;

/// Handles to the outside world shared by every gateway flavour.
#[derive(Clone)]
pub struct GatewayDeps {
    pub exec: Arc<dyn Exec>,
    pub netlink: Arc<dyn Netlink>,
    pub nodes: Arc<dyn NodeStore>,
    pub nftables: Arc<dyn Nftables>,
    pub iptables: Arc<dyn Iptables>,
    pub sriov: Arc<dyn Sriov>,
    /// Reconciler of the routes the gateway installs; its loop is run by the owner
    pub routes: Arc<RouteManager>,
    /// Retry policy of read-only probes
    pub backoff: Backoff,
    pub bridge_locks: BridgeLocks,
}

impl GatewayDeps {
    #[must_use]
    pub fn ovs(&self) -> Ovs {
        Ovs::new(self.exec.clone(), self.backoff)
    }
}
