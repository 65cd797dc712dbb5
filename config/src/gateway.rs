// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The gateway configuration object

use crate::consts::{MGMT_PORT_NAME, PHYSICAL_NETWORK_NAME};
use crate::{ConfigError, ConfigResult, IpFamily, MasqueradeConfig};
use derive_builder::Builder;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

/// Gateway deployment variant.  Chosen once per process.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum GatewayMode {
    /// Host and OVN share the gateway bridge; return traffic goes through OVN
    Shared,
    /// Host network stack handles egress and return traffic
    Local,
    /// Shared gateway running on a SmartNIC on behalf of its host
    Dpu,
    /// Host side of a DPU deployment
    DpuHost,
}

/// Optional behaviour toggles.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Features {
    /// User-defined network segmentation
    pub network_segmentation: bool,
    /// NodePort services are served on this node
    pub node_port: bool,
    /// Kernel IP forwarding is disabled; explicit FORWARD accepts are needed
    pub disable_forwarding: bool,
    /// Program the node IP as the tunnel encapsulation address
    pub set_encap_ip: bool,
}

/// Periods of the background tasks.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Intervals {
    pub route_sync: Duration,
    pub node_ip_sync: Duration,
    pub openflow_check: Duration,
    /// Timeout applied to every external command
    pub command_timeout: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            route_sync: Duration::from_secs(60),
            node_ip_sync: Duration::from_secs(30),
            openflow_check: Duration::from_secs(15),
            command_timeout: Duration::from_secs(15),
        }
    }
}

/// Everything the gateway needs to know about its node and the cluster.
#[derive(Builder, Clone, Debug, Deserialize, PartialEq, Serialize)]
#[builder(derive(Debug))]
pub struct GatewayConfig {
    pub mode: GatewayMode,

    #[builder(setter(into))]
    pub node_name: String,

    /// Pod subnets of this node, at most one per family
    pub host_subnets: Vec<IpNet>,

    /// Gateway interface; discovered from the default route if absent
    #[builder(setter(into, strip_option), default)]
    pub interface: Option<String>,

    /// Next hops, at most one per family, in the order of `host_subnets`
    #[builder(default)]
    pub next_hops: Vec<IpAddr>,

    #[builder(setter(strip_option), default)]
    pub vlan_id: Option<u16>,

    /// Addresses of the gateway interface as seen by this node
    #[builder(default)]
    pub interface_addrs: Vec<IpNet>,

    /// The node IP registered with the cluster (DPU-host mode)
    #[builder(setter(strip_option), default)]
    pub node_ip: Option<IpAddr>,

    /// Subnet of the DPU-facing router, overrides the host subnet mask of `node_ip`
    #[builder(setter(strip_option), default)]
    pub router_subnet: Option<IpNet>,

    /// Allow local gateway mode without a physical uplink
    #[builder(default)]
    pub allow_no_uplink: bool,

    #[builder(default = 1400)]
    pub mtu: u32,

    #[builder(default)]
    pub service_cidrs: Vec<IpNet>,

    #[builder(default)]
    pub cluster_subnets: Vec<IpNet>,

    #[builder(default)]
    pub masquerade: MasqueradeConfig,

    #[builder(default)]
    pub features: Features,

    #[builder(default)]
    pub intervals: Intervals,

    #[builder(setter(into), default = MGMT_PORT_NAME.to_string())]
    pub mgmt_port_name: String,

    #[builder(setter(into), default = PHYSICAL_NETWORK_NAME.to_string())]
    pub physical_network: String,
}

fn unique_families<'a, T: 'a>(
    what: &'static str,
    items: impl Iterator<Item = &'a T>,
    family: impl Fn(&T) -> IpFamily,
) -> Result<BTreeSet<IpFamily>, ConfigError> {
    // two families exist, so a third item is always a duplicate
    let mut families = BTreeSet::new();
    for item in items {
        let fam = family(item);
        if !families.insert(fam) {
            return Err(ConfigError::DuplicateFamily(what, fam));
        }
    }
    Ok(families)
}

impl GatewayConfig {
    /// Check the invariants that the builder cannot express.
    pub fn validate(&self) -> ConfigResult {
        debug!("Validating gateway configuration for node {}", self.node_name);
        if self.host_subnets.is_empty() {
            return Err(ConfigError::NoHostSubnets);
        }
        let subnet_families =
            unique_families("host subnet", self.host_subnets.iter(), IpFamily::of_net)?;
        let hop_families = unique_families("next hop", self.next_hops.iter(), IpFamily::of)?;
        if let Some(family) = hop_families.difference(&subnet_families).next() {
            return Err(ConfigError::NextHopWithoutSubnet(*family));
        }
        if let Some(vlan) = self.vlan_id
            && !(1..=4094).contains(&vlan)
        {
            return Err(ConfigError::InvalidVlan(vlan));
        }
        if self.mode == GatewayMode::DpuHost && self.node_ip.is_none() {
            return Err(ConfigError::Invalid(
                "dpu-host mode requires the node IP".to_string(),
            ));
        }
        self.masquerade.validate()
    }

    /// Enabled IP families, always IPv4 first
    #[must_use]
    pub fn families(&self) -> Vec<IpFamily> {
        self.host_subnets
            .iter()
            .map(IpFamily::of_net)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn ipv4(&self) -> bool {
        self.families().contains(&IpFamily::V4)
    }

    #[must_use]
    pub fn ipv6(&self) -> bool {
        self.families().contains(&IpFamily::V6)
    }

    #[must_use]
    pub fn host_subnet(&self, family: IpFamily) -> Option<IpNet> {
        self.host_subnets
            .iter()
            .find(|n| IpFamily::of_net(n) == family)
            .copied()
    }

    /// The address of the management port: second address of the host subnet
    #[must_use]
    pub fn mgmt_port_ip(&self, family: IpFamily) -> Option<IpAddr> {
        self.host_subnet(family).and_then(|net| nth_host(&net, 2))
    }

    /// The gateway address of the host subnet: its first address
    #[must_use]
    pub fn mgmt_port_gateway(&self, family: IpFamily) -> Option<IpAddr> {
        self.host_subnet(family).and_then(|net| nth_host(&net, 1))
    }

    #[must_use]
    pub fn service_cidrs_of(&self, family: IpFamily) -> Vec<IpNet> {
        self.service_cidrs
            .iter()
            .filter(|n| IpFamily::of_net(n) == family)
            .copied()
            .collect()
    }

    #[must_use]
    pub fn cluster_subnets_of(&self, family: IpFamily) -> Vec<IpNet> {
        self.cluster_subnets
            .iter()
            .filter(|n| IpFamily::of_net(n) == family)
            .copied()
            .collect()
    }
}

/// The `n`-th address of a network (0 being the network address itself)
#[must_use]
pub fn nth_host(net: &IpNet, n: u32) -> Option<IpAddr> {
    match net.trunc() {
        IpNet::V4(v4) => u32::from(v4.network())
            .checked_add(n)
            .map(|a| IpAddr::V4(a.into()))
            .filter(|a| net.contains(a)),
        IpNet::V6(v6) => u128::from(v6.network())
            .checked_add(u128::from(n))
            .map(|a| IpAddr::V6(a.into()))
            .filter(|a| net.contains(a)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn base() -> GatewayConfigBuilder {
        let mut builder = GatewayConfigBuilder::default();
        builder
            .mode(GatewayMode::Shared)
            .node_name("node1")
            .host_subnets(vec!["10.1.1.0/24".parse().unwrap()]);
        builder
    }

    #[test]
    fn minimal_config_is_valid() {
        let config = base().build().unwrap();
        config.validate().unwrap();
        assert_eq!(config.families(), vec![IpFamily::V4]);
        assert_eq!(config.mgmt_port_name, "ovn-k8s-mp0");
        assert_eq!(config.mtu, 1400);
        assert_eq!(
            config.mgmt_port_ip(IpFamily::V4),
            Some("10.1.1.2".parse().unwrap())
        );
        assert_eq!(
            config.mgmt_port_gateway(IpFamily::V4),
            Some("10.1.1.1".parse().unwrap())
        );
        assert_eq!(config.mgmt_port_ip(IpFamily::V6), None);
    }

    #[test]
    fn missing_mandatory_fields() {
        let err = GatewayConfigBuilder::default().build().unwrap_err();
        assert!(ConfigError::from(err).to_string().contains("mode"));
    }

    #[test]
    fn family_invariants() {
        let config = base()
            .host_subnets(vec![
                "10.1.1.0/24".parse().unwrap(),
                "10.1.2.0/24".parse().unwrap(),
            ])
            .build()
            .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateFamily("host subnet", IpFamily::V4))
        ));

        let config = base()
            .next_hops(vec!["fc00::1".parse().unwrap()])
            .build()
            .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NextHopWithoutSubnet(IpFamily::V6))
        ));

        let config = base()
            .host_subnets(vec![
                "fd00:10:1:1::/64".parse().unwrap(),
                "10.1.1.0/24".parse().unwrap(),
            ])
            .next_hops(vec![
                "10.1.1.254".parse().unwrap(),
                "fd00:10:1:1::fe".parse().unwrap(),
            ])
            .build()
            .unwrap();
        config.validate().unwrap();
        assert_eq!(config.families(), vec![IpFamily::V4, IpFamily::V6]);
    }

    #[test]
    fn vlan_and_dpu_host_checks() {
        let config = base().vlan_id(4095).build().unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidVlan(4095))));

        let config = base().mode(GatewayMode::DpuHost).build().unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn mode_names() {
        assert_eq!(GatewayMode::DpuHost.to_string(), "dpu-host");
        assert_eq!(GatewayMode::from_str("local").unwrap(), GatewayMode::Local);
        assert_eq!(
            serde_json::to_string(&GatewayMode::Dpu).unwrap(),
            "\"dpu\""
        );
    }
}
