// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Well-known names and numbers shared with the rest of the cluster network.

/// Management port (OVS internal port) on the node
pub const MGMT_PORT_NAME: &str = "ovn-k8s-mp0";
/// Physical network name mapped onto the gateway bridge
pub const PHYSICAL_NETWORK_NAME: &str = "physnet";
/// Default name of the bridge synthesized when no uplink exists
pub const LOCAL_BRIDGE_NAME: &str = "br-local";
pub const PATCH_PORT_PREFIX: &str = "patch-";
pub const PATCH_PORT_SUFFIX: &str = "-to-br-int";

/// fwmark of host traffic towards ITP=local services
pub const ITP_MARK: u32 = 0x0017_45ec;
/// Routing table consulted for [`ITP_MARK`]ed traffic
pub const ITP_ROUTE_TABLE: u32 = 7;
/// Priority of the policy rule for [`ITP_MARK`]
pub const ITP_RULE_PRIORITY: u32 = 30;

/// The main kernel routing table
pub const MAIN_ROUTE_TABLE: u32 = 254;

pub const GENEVE_HEADER_LENGTH_IPV4: u32 = 58;
pub const GENEVE_HEADER_LENGTH_IPV6: u32 = GENEVE_HEADER_LENGTH_IPV4 + 20;

/// Node annotations written or read by the gateway
pub mod annotations {
    pub const L3_GATEWAY_CONFIG: &str = "k8s.ovn.org/l3-gateway-config";
    pub const MASQUERADE_SUBNET: &str = "k8s.ovn.org/node-masquerade-subnet";
    pub const GATEWAY_MTU_SUPPORT: &str = "k8s.ovn.org/gateway-mtu-support";
    pub const CHASSIS_ID: &str = "k8s.ovn.org/node-chassis-id";
    /// Key of the default network within the L3 gateway annotation
    pub const DEFAULT_NETWORK: &str = "default";
}

/// Name of the OVS patch port connecting `bridge` to the integration bridge
#[must_use]
pub fn patch_port_name(bridge: &str, node: &str) -> String {
    format!("{PATCH_PORT_PREFIX}{bridge}_{node}{PATCH_PORT_SUFFIX}")
}

/// Name of the bridge created on top of a plain uplink
#[must_use]
pub fn bridge_name_for(uplink: &str) -> String {
    format!("br{uplink}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names() {
        assert_eq!(
            patch_port_name("breth0", "node1"),
            "patch-breth0_node1-to-br-int"
        );
        assert_eq!(bridge_name_for("eth0"), "breth0");
        assert_eq!(format!("{ITP_MARK:#x}"), "0x1745ec");
    }
}
