// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Command line of the node gateway agent.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub use clap::Parser;
use clap::ValueEnum;
use config::consts::{MGMT_PORT_NAME, PHYSICAL_NETWORK_NAME};
use config::{
    ConfigError, Features, GatewayConfig, GatewayConfigBuilder, GatewayMode, Intervals,
    MasqueradeConfig,
};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// How traffic leaves the node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum GatewayModeArg {
    #[default]
    Shared,
    Local,
}

/// Where the agent runs in a DPU deployment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum NodeMode {
    /// Regular node, no DPU
    #[default]
    Full,
    /// On the DPU, on behalf of its host
    Dpu,
    /// On the host of a DPU
    DpuHost,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidCmdArguments {
    #[error("{0} nodes only support the shared gateway mode")]
    ModeConflict(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Parser, Debug)]
#[command(name = "nodegw")]
#[command(version)]
#[command(about = "Gateway agent of a cluster network node", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct CmdArgs {
    #[arg(long, value_enum, default_value_t = GatewayModeArg::Shared)]
    gateway_mode: GatewayModeArg,

    #[arg(long, value_enum, default_value_t = NodeMode::Full)]
    node_mode: NodeMode,

    #[arg(long, help = "Name of this node [default: hostname]")]
    node_name: Option<String>,

    #[arg(
        long,
        value_name = "CIDR",
        value_delimiter = ',',
        required = true,
        help = "Pod subnets of this node, at most one per IP family"
    )]
    host_subnet: Vec<IpNet>,

    #[arg(
        long,
        value_name = "IFNAME",
        help = "Gateway interface [default: interface of the default route]"
    )]
    gateway_interface: Option<String>,

    #[arg(
        long,
        value_name = "IP",
        value_delimiter = ',',
        help = "Gateway next hops, at most one per IP family [default: default route gateways]"
    )]
    gateway_nexthop: Vec<IpAddr>,

    #[arg(long, value_name = "VLAN", help = "VLAN tag of the gateway traffic")]
    gateway_vlanid: Option<u16>,

    #[arg(
        long,
        value_name = "CIDR",
        value_delimiter = ',',
        help = "Addresses of the gateway interface [default: addresses found on the bridge]"
    )]
    gateway_address: Vec<IpNet>,

    #[arg(long, help = "Allow a local gateway on a bridge without physical port")]
    allow_no_uplink: bool,

    #[arg(long, value_name = "IP", help = "Node IP, required on DPU hosts")]
    node_ip: Option<IpAddr>,

    #[arg(
        long,
        value_name = "CIDR",
        help = "Subnet of the DPU-facing router, overrides the node IP mask"
    )]
    router_subnet: Option<IpNet>,

    #[arg(long, default_value_t = 1400, help = "MTU of the pod network")]
    mtu: u32,

    #[arg(long, value_name = "CIDR", value_delimiter = ',')]
    service_cidr: Vec<IpNet>,

    #[arg(long, value_name = "CIDR", value_delimiter = ',')]
    cluster_subnet: Vec<IpNet>,

    #[arg(long, value_name = "CIDR", default_value = "169.254.169.0/29")]
    masquerade_subnet_v4: Ipv4Net,

    #[arg(long, value_name = "CIDR", default_value = "fd69::/125")]
    masquerade_subnet_v6: Ipv6Net,

    #[arg(long, help = "Serve NodePort services on this node")]
    nodeport: bool,

    #[arg(long, help = "Enable user-defined network segmentation")]
    enable_network_segmentation: bool,

    #[arg(long, help = "Kernel forwarding is disabled; accept gateway traffic explicitly")]
    disable_forwarding: bool,

    #[arg(long, help = "Program the node IP as tunnel encapsulation address")]
    set_encap_ip: bool,

    #[arg(long, default_value = MGMT_PORT_NAME)]
    mgmt_port_name: String,

    #[arg(long, default_value = PHYSICAL_NETWORK_NAME)]
    physical_network: String,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 15,
        help = "Timeout of every external command"
    )]
    command_timeout: u64,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 60,
        help = "Period of the route reconciliation"
    )]
    route_sync_interval: u64,

    #[arg(
        long,
        value_name = "PATH",
        help = "Manage kernel state inside the network namespace at PATH"
    )]
    netns: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        help = "Keep node records as YAML files in DIR instead of talking to the API server"
    )]
    k8s_less_dir: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = false,
        help = "Show configurable tracing targets and exit"
    )]
    show_tracing_targets: bool,

    #[arg(
        long,
        value_name = "tracing configuration",
        help = "Tracing config string as comma-separated sequence of tag=level, with level one in [off,error,warn,info,debug,trace].
Passing default=level sets the default log-level.
Passing all=level allows setting the log-level of all targets to level.
E.g. default=error,all=info,routing=debug"
    )]
    tracing: Option<String>,
}

impl CmdArgs {
    #[must_use]
    pub fn node_name(&self) -> Option<&str> {
        self.node_name.as_deref()
    }

    #[must_use]
    pub fn netns(&self) -> Option<&PathBuf> {
        self.netns.as_ref()
    }

    #[must_use]
    pub fn k8s_less_dir(&self) -> Option<&PathBuf> {
        self.k8s_less_dir.as_ref()
    }

    #[must_use]
    pub fn show_tracing_targets(&self) -> bool {
        self.show_tracing_targets
    }

    #[must_use]
    pub fn tracing(&self) -> Option<&String> {
        self.tracing.as_ref()
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    fn mode(&self) -> Result<GatewayMode, InvalidCmdArguments> {
        match (self.node_mode, self.gateway_mode) {
            (NodeMode::Full, GatewayModeArg::Shared) => Ok(GatewayMode::Shared),
            (NodeMode::Full, GatewayModeArg::Local) => Ok(GatewayMode::Local),
            (NodeMode::Dpu, GatewayModeArg::Shared) => Ok(GatewayMode::Dpu),
            (NodeMode::DpuHost, GatewayModeArg::Shared) => Ok(GatewayMode::DpuHost),
            (NodeMode::Dpu, GatewayModeArg::Local) => {
                Err(InvalidCmdArguments::ModeConflict("DPU"))
            }
            (NodeMode::DpuHost, GatewayModeArg::Local) => {
                Err(InvalidCmdArguments::ModeConflict("DPU host"))
            }
        }
    }

    /// The validated gateway configuration.  `default_node_name` is used unless
    /// `--node-name` was given.
    pub fn gateway_config(
        &self,
        default_node_name: &str,
    ) -> Result<GatewayConfig, InvalidCmdArguments> {
        let mut builder = GatewayConfigBuilder::default();
        builder
            .mode(self.mode()?)
            .node_name(self.node_name().unwrap_or(default_node_name))
            .host_subnets(self.host_subnet.clone())
            .next_hops(self.gateway_nexthop.clone())
            .interface_addrs(self.gateway_address.clone())
            .allow_no_uplink(self.allow_no_uplink)
            .mtu(self.mtu)
            .service_cidrs(self.service_cidr.clone())
            .cluster_subnets(self.cluster_subnet.clone())
            .masquerade(MasqueradeConfig {
                v4_subnet: self.masquerade_subnet_v4,
                v6_subnet: self.masquerade_subnet_v6,
            })
            .features(Features {
                network_segmentation: self.enable_network_segmentation,
                node_port: self.nodeport,
                disable_forwarding: self.disable_forwarding,
                set_encap_ip: self.set_encap_ip,
            })
            .intervals(Intervals {
                route_sync: Duration::from_secs(self.route_sync_interval),
                command_timeout: self.command_timeout(),
                ..Intervals::default()
            })
            .mgmt_port_name(self.mgmt_port_name.as_str())
            .physical_network(self.physical_network.as_str());
        if let Some(interface) = &self.gateway_interface {
            builder.interface(interface.as_str());
        }
        if let Some(vlan) = self.gateway_vlanid {
            builder.vlan_id(vlan);
        }
        if let Some(node_ip) = self.node_ip {
            builder.node_ip(node_ip);
        }
        if let Some(subnet) = self.router_subnet {
            builder.router_subnet(subnet);
        }
        let config = builder.build().map_err(ConfigError::from)?;
        config.validate()?;
        debug!("Gateway configuration: {config:?}");
        Ok(config)
    }
}
