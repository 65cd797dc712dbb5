// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Host side of a DPU deployment.  The bridge and its flows live on the DPU; the host
//! only needs its uplink up and the routes steering service and masquerade traffic
//! towards the DPU.

use crate::{GatewayDeps, GatewayError, GatewayState, NextHopResolver};
use config::{GatewayConfig, IpFamily};
use ipnet::IpNet;
use routing::RouteEntry;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

pub struct DpuHostGateway {
    config: Arc<GatewayConfig>,
    deps: GatewayDeps,
    state: GatewayState,
    interface: Option<String>,
    primary: Option<IpNet>,
}

/// The node IP with the mask of the subnet containing it.  `router_subnet`, when
/// given, is the only candidate.
pub fn primary_address(
    node_ip: IpAddr,
    router_subnet: Option<IpNet>,
    link_addrs: &[IpNet],
) -> Result<IpNet, GatewayError> {
    let candidates: Vec<IpNet> = match router_subnet {
        Some(subnet) => vec![subnet],
        None => link_addrs.to_vec(),
    };
    candidates
        .iter()
        .find(|net| net.contains(&node_ip))
        .and_then(|net| IpNet::new(node_ip, net.prefix_len()).ok())
        .ok_or(GatewayError::NodeIpNotInSubnet(node_ip))
}

/// Routes steering service and masquerade traffic out of `interface`
#[must_use]
pub fn dpu_host_routes(
    config: &GatewayConfig,
    interface: &str,
    node_ip: IpAddr,
) -> Vec<RouteEntry> {
    let mut entries = Vec::new();
    for family in config.families() {
        let ips = config.masquerade.ips(family);
        for svc in config.service_cidrs_of(family) {
            entries.push(RouteEntry {
                gateway: Some(ips.dummy_next_hop),
                source: Some(ips.host),
                mtu: Some(config.mtu),
                ..RouteEntry::new(svc, interface)
            });
        }
        if IpFamily::of(&node_ip) == family {
            entries.push(RouteEntry {
                source: Some(node_ip),
                ..RouteEntry::new(IpFamily::host_net(ips.ovn), interface)
            });
        }
    }
    entries
}

impl DpuHostGateway {
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>, deps: GatewayDeps) -> Self {
        Self {
            config,
            deps,
            state: GatewayState::Unconfigured,
            interface: None,
            primary: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> GatewayState {
        self.state
    }

    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// The node IP with its subnet mask
    #[must_use]
    pub fn primary_address(&self) -> Option<IpNet> {
        self.primary
    }

    pub async fn init_func(&mut self) -> Result<(), GatewayError> {
        self.state.require("init_func", GatewayState::Unconfigured)?;
        self.state = GatewayState::Initializing;
        match self.discover().await {
            Ok((interface, primary)) => {
                self.interface = Some(interface);
                self.primary = Some(primary);
                Ok(())
            }
            Err(e) => {
                self.state = GatewayState::Unconfigured;
                Err(e)
            }
        }
    }

    async fn discover(&self) -> Result<(String, IpNet), GatewayError> {
        let config = self.config.as_ref();
        let netlink = &self.deps.netlink;
        let node_ip = config.node_ip.ok_or(GatewayError::Missing("node IP"))?;

        let interface = match &config.interface {
            Some(interface) => interface.clone(),
            None => {
                NextHopResolver::new(self.deps.ovs(), netlink.clone())
                    .interface_by_ip(node_ip)
                    .await?
                    .0
            }
        };
        let link = netlink.link_by_name(&interface).await?;
        netlink.link_set_up(link.index).await?;

        let link_addrs: Vec<IpNet> = netlink
            .addresses(Some(link.index), Some(IpFamily::of(&node_ip)))
            .await?
            .into_iter()
            .map(|a| a.addr)
            .collect();
        let primary = primary_address(node_ip, config.router_subnet, &link_addrs)?;
        info!("DPU host gateway on {interface}, node address {primary}");

        for entry in dpu_host_routes(config, &interface, node_ip) {
            self.deps.routes.add(entry).await?;
        }
        Ok((interface, primary))
    }

    /// Nothing to publish: the DPU speaks for the host.
    #[allow(clippy::unused_async)]
    pub async fn init(&mut self) -> Result<(), GatewayError> {
        self.state.require("init", GatewayState::Initializing)?;
        debug!("DPU host gateway has no annotations to publish");
        self.state = GatewayState::Ready;
        Ok(())
    }

    /// Route drift is handled by the route reconciler; no tasks of our own.
    pub fn start(
        &mut self,
        _stop: &CancellationToken,
        _tracker: &TaskTracker,
    ) -> Result<(), GatewayError> {
        self.state.require("start", GatewayState::Ready)?;
        info!("DPU host gateway started");
        self.state = GatewayState::Running;
        Ok(())
    }
}
