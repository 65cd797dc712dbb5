// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Gateways built around an OVS bridge on the node's uplink: shared, local and DPU.

use crate::itp::ensure_itp;
use crate::nodeip::is_link_local;
use crate::{GatewayDeps, GatewayError, GatewayState, NextHopResolver, NodeIpManager, Resolved};
use config::consts::annotations::{CHASSIS_ID, GATEWAY_MTU_SUPPORT, L3_GATEWAY_CONFIG};
use config::{GatewayConfig, GatewayMode};
use interface_manager::Mac;
use ipnet::IpNet;
use k8s_intf::AnnotationChanges;
use k8s_intf::annotations::{L3GatewayConfig, mtu_support_value};
use ovs::{BridgeInfo, BridgeProvisioner, FlowInputs, OpenFlowManager};
use rules::ipt::gateway_iptables;
use rules::nft::gateway_ruleset;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// What `init_func` found out and built
struct Discovered {
    resolved: Resolved,
    info: BridgeInfo,
    interface_addrs: Vec<IpNet>,
    openflow: Arc<OpenFlowManager>,
    node_ip: Arc<NodeIpManager>,
}

pub struct BridgeGateway {
    config: Arc<GatewayConfig>,
    deps: GatewayDeps,
    state: GatewayState,
    discovered: Option<Discovered>,
}

impl BridgeGateway {
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>, deps: GatewayDeps) -> Self {
        Self {
            config,
            deps,
            state: GatewayState::Unconfigured,
            discovered: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> GatewayState {
        self.state
    }

    #[must_use]
    pub fn bridge_info(&self) -> Option<&BridgeInfo> {
        self.discovered.as_ref().map(|d| &d.info)
    }

    #[must_use]
    pub fn resolved(&self) -> Option<&Resolved> {
        self.discovered.as_ref().map(|d| &d.resolved)
    }

    #[must_use]
    pub fn node_ip_manager(&self) -> Option<Arc<NodeIpManager>> {
        self.discovered.as_ref().map(|d| d.node_ip.clone())
    }

    #[must_use]
    pub fn openflow_manager(&self) -> Option<Arc<OpenFlowManager>> {
        self.discovered.as_ref().map(|d| d.openflow.clone())
    }

    fn discovered(&self) -> Result<&Discovered, GatewayError> {
        self.discovered
            .as_ref()
            .ok_or(GatewayError::Missing("bridge discovery"))
    }

    /// Discover or create everything the gateway runs on: the bridge, its ports and
    /// ids, the packet filter skeleton, the masquerade state and the flow table.
    pub async fn init_func(&mut self) -> Result<(), GatewayError> {
        self.state.require("init_func", GatewayState::Unconfigured)?;
        self.state = GatewayState::Initializing;
        match self.discover().await {
            Ok(discovered) => {
                self.discovered = Some(discovered);
                Ok(())
            }
            Err(e) => {
                self.state = GatewayState::Unconfigured;
                Err(e)
            }
        }
    }

    async fn discover(&self) -> Result<Discovered, GatewayError> {
        let config = self.config.as_ref();
        let deps = &self.deps;
        let ovs = deps.ovs();

        let resolved = NextHopResolver::new(ovs.clone(), deps.netlink.clone())
            .resolve(config)
            .await?;
        info!(
            "{} gateway on {} with next hops {:?}",
            config.mode, resolved.interface, resolved.next_hops
        );

        let provisioner = BridgeProvisioner::new(ovs.clone(), deps.netlink.clone(), config);
        let mut info = provisioner
            .ensure_bridge(&resolved.interface, config.vlan_id)
            .await?;
        if config.mode == GatewayMode::Dpu {
            info.host_rep = Some(
                provisioner
                    .discover_host_representor(&info.bridge, deps.sriov.as_ref())
                    .await?,
            );
        }

        deps.nftables.apply(&gateway_ruleset(config)).await?;
        for family in config.families() {
            gateway_iptables(config, family)
                .apply(deps.iptables.as_ref(), family)
                .await?;
        }

        let node_ip = Arc::new(NodeIpManager::new(
            config,
            &info.bridge,
            ovs.clone(),
            deps.netlink.clone(),
            deps.nodes.clone(),
            deps.routes.clone(),
            &deps.bridge_locks,
        ));
        node_ip.sync().await?;
        let interface_addrs = self.interface_addrs(&info).await?;

        if config.mode != GatewayMode::Dpu {
            ensure_itp(
                config,
                &deps.routes,
                deps.netlink.as_ref(),
                deps.exec.as_ref(),
            )
            .await?;
        }

        let openflow = Arc::new(OpenFlowManager::new(
            ovs,
            &info,
            FlowInputs::new(&info, config),
        ));
        openflow.sync_flows().await?;
        debug!("Installed {} flows on {}", openflow.flows().len(), info.bridge);

        Ok(Discovered {
            resolved,
            info,
            interface_addrs,
            openflow,
            node_ip,
        })
    }

    /// The configured interface addresses, or the global addresses of the bridge.
    async fn interface_addrs(&self, info: &BridgeInfo) -> Result<Vec<IpNet>, GatewayError> {
        if !self.config.interface_addrs.is_empty() {
            return Ok(self.config.interface_addrs.clone());
        }
        let link = self.deps.netlink.link_by_name(&info.bridge).await?;
        let mut addrs = Vec::new();
        for family in self.config.families() {
            let masquerade = self.config.masquerade.subnet(family);
            addrs.extend(
                self.deps
                    .netlink
                    .addresses(Some(link.index), Some(family))
                    .await?
                    .into_iter()
                    .map(|a| a.addr)
                    .filter(|net| {
                        !masquerade.contains(&net.addr()) && !is_link_local(&net.addr())
                    }),
            );
        }
        Ok(addrs)
    }

    /// The L3 gateway config other cluster components use to reach this node
    fn l3_gateway_config(&self, discovered: &Discovered) -> L3GatewayConfig {
        let info = &discovered.info;
        // a DPU gateway acts on behalf of its host
        let mac: Mac = info.host_rep.as_ref().map_or(info.mac, |rep| rep.peer_mac);
        let mode = match self.config.mode {
            GatewayMode::Local => GatewayMode::Local,
            _ => GatewayMode::Shared,
        };
        L3GatewayConfig {
            mode,
            interface_id: format!("{}_{}", info.bridge, self.config.node_name),
            mac_address: mac.to_string(),
            ip_addresses: discovered.interface_addrs.clone(),
            next_hops: discovered.resolved.next_hops.clone(),
            chassis_id: Some(info.chassis_id.clone()),
            vlan_id: self.config.vlan_id.map(|vlan| vlan.to_string()),
            node_port_enable: Some(self.config.features.node_port.to_string()),
        }
    }

    /// Publish the gateway annotations of the node.
    pub async fn init(&mut self) -> Result<(), GatewayError> {
        self.state.require("init", GatewayState::Initializing)?;
        let discovered = self.discovered()?;
        let l3 = self.l3_gateway_config(discovered);
        let changes = AnnotationChanges::from([
            (L3_GATEWAY_CONFIG.to_string(), Some(l3.to_annotation()?)),
            (
                CHASSIS_ID.to_string(),
                Some(discovered.info.chassis_id.clone()),
            ),
            (
                GATEWAY_MTU_SUPPORT.to_string(),
                mtu_support_value(discovered.info.mtu_supported()),
            ),
        ]);
        self.deps
            .nodes
            .set_annotations(&self.config.node_name, &changes)
            .await?;
        info!(
            "Published gateway config of node {}: {}",
            self.config.node_name, l3.interface_id
        );
        self.state = GatewayState::Ready;
        Ok(())
    }

    /// Launch the periodic node IP sync and flow checks.  Both stop when `stop` is
    /// cancelled; `tracker` tracks their completion.
    pub fn start(
        &mut self,
        stop: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<(), GatewayError> {
        self.state.require("start", GatewayState::Ready)?;
        let discovered = self.discovered()?;
        let intervals = self.config.intervals;

        let node_ip = discovered.node_ip.clone();
        let token = stop.clone();
        tracker.spawn(async move { node_ip.run(token, intervals.node_ip_sync).await });

        let openflow = discovered.openflow.clone();
        let token = stop.clone();
        tracker.spawn(async move { openflow.run(token, intervals.openflow_check).await });

        info!("{} gateway started", self.config.mode);
        self.state = GatewayState::Running;
        Ok(())
    }
}
