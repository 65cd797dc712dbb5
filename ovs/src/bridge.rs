// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Creation and discovery of the gateway bridge.

use crate::{Ovs, OvsError, unquote};
use config::consts::{bridge_name_for, patch_port_name};
use config::{GatewayConfig, IpFamily};
use hardware::{PortFlavour, Sriov};
use interface_manager::{Mac, Netlink, migrate_ip_config};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PKT_LEN_CHECK_FEATURE: &str = "Check pkt length action: Yes";

/// The host's PCI physical function as seen from a DPU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostRepresentor {
    pub name: String,
    pub ofport: u32,
    /// MAC address the host uses on its side of the function
    pub peer_mac: Mac,
}

/// What the rest of the gateway needs to know about the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeInfo {
    pub bridge: String,
    /// The physical port of the bridge, absent on uplink-less local gateways
    pub uplink: Option<String>,
    pub mac: Mac,
    pub vlan: Option<u16>,
    pub patch_port: String,
    pub patch_ofport: u32,
    pub uplink_ofport: Option<u32>,
    pub hw_offload: bool,
    pub pkt_len_check: bool,
    pub chassis_id: String,
    pub host_rep: Option<HostRepresentor>,
}

impl BridgeInfo {
    /// Whether OVN can enforce the gateway MTU in the datapath
    #[must_use]
    pub fn mtu_supported(&self) -> bool {
        self.pkt_len_check && !self.hw_offload
    }
}

/// Ensures that a gateway bridge exists on top of the uplink.
pub struct BridgeProvisioner {
    ovs: Ovs,
    netlink: Arc<dyn Netlink>,
    node_name: String,
    physical_network: String,
    families: Vec<IpFamily>,
    allow_no_uplink: bool,
}

impl BridgeProvisioner {
    #[must_use]
    pub fn new(ovs: Ovs, netlink: Arc<dyn Netlink>, config: &GatewayConfig) -> Self {
        Self {
            ovs,
            netlink,
            node_name: config.node_name.clone(),
            physical_network: config.physical_network.clone(),
            families: config.families(),
            allow_no_uplink: config.allow_no_uplink,
        }
    }

    #[must_use]
    pub fn ovs(&self) -> &Ovs {
        &self.ovs
    }

    /// Make sure `interface` is part of a gateway bridge and gather everything the
    /// gateway needs about it.  Running it again on an established bridge changes
    /// nothing.
    pub async fn ensure_bridge(
        &self,
        interface: &str,
        vlan: Option<u16>,
    ) -> Result<BridgeInfo, OvsError> {
        let (bridge, uplink) = self.bridge_for_interface(interface).await?;
        info!(
            "Gateway bridge is {bridge}, uplink {}",
            uplink.as_deref().unwrap_or("<none>")
        );

        for family in &self.families {
            let proto = match family {
                IpFamily::V4 => "ipv4",
                IpFamily::V6 => "ipv6",
            };
            let key = format!("net.{proto}.conf.{bridge}.forwarding");
            exec::sysctl(self.ovs.exec(), &key, "1").await?;
        }

        let mac_out = self
            .ovs
            .vsctl_probe(["--if-exists", "get", "interface", bridge.as_str(), "mac_in_use"])
            .await?;
        let mac: Mac = unquote(&mac_out)
            .parse()
            .map_err(|_| OvsError::Parse("MAC address", mac_out.clone()))?;

        self.add_bridge_mapping(&bridge).await?;

        let chassis_id = self.ovs.get_external_id("system-id").await?;
        if chassis_id.is_empty() {
            return Err(OvsError::NoChassisId);
        }
        let pkt_len_check = self.detect_pkt_len_check(&bridge).await;
        let hw_offload = self.detect_hw_offload().await?;

        let patch_port = patch_port_name(&bridge, &self.node_name);
        let patch_ofport = self.ovs.patch_ofport(&patch_port).await?;
        let uplink_ofport = match &uplink {
            Some(uplink) => Some(self.ovs.ofport(uplink).await?),
            None => None,
        };

        Ok(BridgeInfo {
            bridge,
            uplink,
            mac,
            vlan,
            patch_port,
            patch_ofport,
            uplink_ofport,
            hw_offload,
            pkt_len_check,
            chassis_id,
            host_rep: None,
        })
    }

    /// Returns the bridge and its uplink port, creating the bridge if needed.
    async fn bridge_for_interface(
        &self,
        interface: &str,
    ) -> Result<(String, Option<String>), OvsError> {
        if let Some(bridge) = self.ovs.port_to_bridge(interface).await {
            debug!("{interface} is already attached to bridge {bridge}");
            return Ok((bridge, Some(interface.to_string())));
        }
        if self.ovs.vsctl(["br-exists", interface]).await.is_ok() {
            debug!("{interface} is a bridge");
            let uplink = self.uplink_of(interface).await?;
            if uplink.is_none() && !self.allow_no_uplink {
                return Err(OvsError::NoUplink(interface.to_string()));
            }
            return Ok((interface.to_string(), uplink));
        }
        let bridge = bridge_name_for(interface);
        self.create_bridge(&bridge, interface).await?;
        Ok((bridge, Some(interface.to_string())))
    }

    /// The single-interface port of `bridge` with a `system` interface
    async fn uplink_of(&self, bridge: &str) -> Result<Option<String>, OvsError> {
        for port in self.ports_of(bridge).await? {
            let iface_type = self
                .ovs
                .vsctl_probe(["get", "Interface", port.as_str(), "Type"])
                .await?;
            let iface_type = unquote(&iface_type);
            if iface_type == "system" || iface_type.is_empty() {
                return Ok(Some(port));
            }
        }
        Ok(None)
    }

    /// Ports of `bridge` that carry exactly one interface
    async fn ports_of(&self, bridge: &str) -> Result<Vec<String>, OvsError> {
        let listing = self.ovs.vsctl_probe(["list-ports", bridge]).await?;
        let mut ports = Vec::new();
        for port in listing.lines().map(str::trim).filter(|p| !p.is_empty()) {
            let interfaces = self
                .ovs
                .vsctl_probe(["get", "Port", port, "Interfaces"])
                .await?;
            let interfaces = interfaces.trim().trim_start_matches('[').trim_end_matches(']');
            if interfaces.contains(',') {
                debug!("Skipping bonded port {port}");
                continue;
            }
            ports.push(port.to_string());
        }
        Ok(ports)
    }

    async fn create_bridge(&self, bridge: &str, uplink: &str) -> Result<(), OvsError> {
        let link = self.netlink.link_by_name(uplink).await?;
        let mac = link
            .mac
            .ok_or_else(|| OvsError::NoMac(uplink.to_string()))?;
        info!("Creating bridge {bridge} on top of {uplink}");
        let hwaddr = format!("other_config:hwaddr={mac}");
        self.ovs
            .vsctl([
                "--",
                "--may-exist",
                "add-br",
                bridge,
                "--",
                "br-set-external-id",
                bridge,
                "bridge-id",
                bridge,
                "--",
                "br-set-external-id",
                bridge,
                "bridge-uplink",
                uplink,
                "--",
                "set",
                "bridge",
                bridge,
                "fail-mode=standalone",
                hwaddr.as_str(),
                "--",
                "--may-exist",
                "add-port",
                bridge,
                uplink,
                "--",
                "set",
                "port",
                uplink,
                "other-config:transient=true",
            ])
            .await?;
        migrate_ip_config(self.netlink.as_ref(), uplink, bridge).await?;
        Ok(())
    }

    /// Merge `<physnet>:<bridge>` into the OVN bridge mappings.
    async fn add_bridge_mapping(&self, bridge: &str) -> Result<(), OvsError> {
        let current = self.ovs.get_external_id("ovn-bridge-mappings").await?;
        let mut mappings: Vec<String> = current
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .filter(|m| {
                m.split_once(':')
                    .is_none_or(|(net, _)| net != self.physical_network)
            })
            .map(ToString::to_string)
            .collect();
        let ours = format!("{}:{bridge}", self.physical_network);
        mappings.push(ours);
        let merged = mappings.join(",");
        if merged == current {
            debug!("Bridge mappings already up to date: {merged}");
            return Ok(());
        }
        let setting = format!("external_ids:ovn-bridge-mappings={merged}");
        self.ovs
            .vsctl(["set", "Open_vSwitch", ".", setting.as_str()])
            .await?;
        Ok(())
    }

    async fn detect_pkt_len_check(&self, bridge: &str) -> bool {
        match self.ovs.appctl(["dpif/show-dp-features", bridge]).await {
            Ok(features) => features.contains(PKT_LEN_CHECK_FEATURE),
            Err(e) => {
                warn!("Unable to detect datapath features of {bridge}: {e}");
                false
            }
        }
    }

    async fn detect_hw_offload(&self) -> Result<bool, OvsError> {
        let out = self
            .ovs
            .vsctl_probe([
                "--if-exists",
                "get",
                "Open_vSwitch",
                ".",
                "other_config:hw-offload",
            ])
            .await?;
        Ok(unquote(&out) == "true")
    }

    /// Find the representor of the host's PCI physical function among the bridge ports.
    pub async fn discover_host_representor(
        &self,
        bridge: &str,
        sriov: &dyn Sriov,
    ) -> Result<HostRepresentor, OvsError> {
        for port in self.ports_of(bridge).await? {
            let name = self
                .ovs
                .vsctl_probe(["get", "Interface", port.as_str(), "Name"])
                .await?;
            let name = unquote(&name).to_string();
            match sriov.port_flavour(&name).await {
                Ok(PortFlavour::PciPf) => {
                    let ofport = self.ovs.ofport(&name).await?;
                    let peer_mac = sriov.peer_mac(&name).await?;
                    info!("Host representor is {name} (ofport {ofport}, peer {peer_mac})");
                    return Ok(HostRepresentor {
                        name,
                        ofport,
                        peer_mac,
                    });
                }
                Ok(flavour) => debug!("Port {name} has flavour {flavour:?}"),
                Err(e) => debug!("Port {name} is not a representor: {e}"),
            }
        }
        Err(OvsError::NoHostRepresentor(bridge.to_string()))
    }
}
