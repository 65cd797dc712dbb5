// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The flow table of the gateway bridge.
//!
//! Flows are always computed as a whole from [`FlowInputs`] and installed in a single
//! bundle.  Egress traffic is committed to conntrack zone [`CT_ZONE`] with a mark that
//! remembers who sent it (OVN or the host), so that replies coming in through the
//! uplink can be steered back to the right side.

use crate::{BridgeInfo, HostRepresentor};
use config::{GatewayConfig, GatewayMode, IpFamily, MasqueradeIps};
use interface_manager::Mac;

/// Cookie carried by every flow the gateway installs
pub const DEFAULT_COOKIE: &str = "0xdeff105";
/// Conntrack zone of traffic leaving through the uplink
pub const CT_ZONE: u16 = 64000;
/// Conntrack mark of connections initiated by OVN
pub const OVN_CT_MARK: &str = "0x1";
/// Conntrack mark of connections initiated by the host
pub const HOST_CT_MARK: &str = "0x2";

/// Everything the flow table depends on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowInputs {
    pub mode: GatewayMode,
    pub mac: Mac,
    pub vlan: Option<u16>,
    pub patch_ofport: u32,
    pub uplink_ofport: Option<u32>,
    pub masquerade: Vec<MasqueradeIps>,
    /// Stands in for the bridge-local port on a DPU
    pub host_rep: Option<HostRepresentor>,
}

impl FlowInputs {
    #[must_use]
    pub fn new(info: &BridgeInfo, config: &GatewayConfig) -> Self {
        Self {
            mode: config.mode,
            mac: info.mac,
            vlan: info.vlan,
            patch_ofport: info.patch_ofport,
            uplink_ofport: info.uplink_ofport,
            masquerade: config
                .families()
                .into_iter()
                .map(|family| config.masquerade.ips(family))
                .collect(),
            host_rep: info.host_rep.clone(),
        }
    }

    fn host_port(&self) -> String {
        match &self.host_rep {
            Some(rep) => rep.ofport.to_string(),
            None => "LOCAL".to_string(),
        }
    }
}

fn proto(family: IpFamily) -> (&'static str, &'static str) {
    match family {
        IpFamily::V4 => ("ip", "nw_dst"),
        IpFamily::V6 => ("ipv6", "ipv6_dst"),
    }
}

fn flow(table: u8, priority: u16, rest: &str) -> String {
    format!("cookie={DEFAULT_COOKIE},table={table},priority={priority},{rest}")
}

fn commit(mark: &str) -> String {
    format!("ct(commit,zone={CT_ZONE},exec(set_field:{mark}->ct_mark))")
}

/// Compute the complete flow table.  The same inputs always yield the same flows, in
/// the same order.
#[must_use]
pub fn build_flows(inputs: &FlowInputs) -> Vec<String> {
    let mut flows = Vec::new();
    let patch = inputs.patch_ofport;
    let host = inputs.host_port();
    let pop_vlan = if inputs.vlan.is_some() { "strip_vlan," } else { "" };
    let push_vlan = inputs
        .vlan
        .map(|vid| format!("mod_vlan_vid:{vid},"))
        .unwrap_or_default();

    if let Some(uplink) = inputs.uplink_ofport {
        for masq in &inputs.masquerade {
            let (ip, _) = proto(IpFamily::of(&masq.ovn));
            // OVN already tags its traffic on the localnet port
            flows.push(flow(
                0,
                100,
                &format!("in_port={patch},{ip},actions={},output:{uplink}", commit(OVN_CT_MARK)),
            ));
            flows.push(flow(
                0,
                100,
                &format!(
                    "in_port={host},{ip},actions={},{push_vlan}output:{uplink}",
                    commit(HOST_CT_MARK)
                ),
            ));
            flows.push(flow(
                0,
                50,
                &format!("in_port={uplink},{ip},actions=ct(zone={CT_ZONE},table=1)"),
            ));
        }
        for masq in &inputs.masquerade {
            let (ip, _) = proto(IpFamily::of(&masq.ovn));
            for state in ["+trk+est", "+trk+rel"] {
                flows.push(flow(
                    1,
                    100,
                    &format!("ct_state={state},ct_mark={OVN_CT_MARK},{ip},actions=output:{patch}"),
                ));
                flows.push(flow(
                    1,
                    100,
                    &format!(
                        "ct_state={state},ct_mark={HOST_CT_MARK},{ip},actions={pop_vlan}output:{host}"
                    ),
                ));
            }
        }
        flows.push(flow(1, 0, "actions=NORMAL"));
    }

    for masq in &inputs.masquerade {
        let (ip, dst) = proto(IpFamily::of(&masq.ovn));
        flows.push(flow(
            0,
            500,
            &format!("in_port={host},{ip},{dst}={},actions=output:{patch}", masq.ovn),
        ));
        flows.push(flow(
            0,
            500,
            &format!("in_port={patch},{ip},{dst}={},actions=output:{host}", masq.host),
        ));
    }

    if inputs.mode == GatewayMode::Local
        && let Some(uplink) = inputs.uplink_ofport
    {
        flows.push(flow(
            0,
            110,
            &format!(
                "in_port={uplink},dl_dst={},actions={pop_vlan}output:{host}",
                inputs.mac
            ),
        ));
    }

    if let (Some(rep), Some(uplink)) = (&inputs.host_rep, inputs.uplink_ofport) {
        flows.push(flow(
            0,
            110,
            &format!(
                "in_port={uplink},dl_dst={},actions={pop_vlan}output:{}",
                rep.peer_mac, rep.ofport
            ),
        ));
        flows.push(flow(
            0,
            110,
            &format!("in_port={},actions={push_vlan}output:{uplink}", rep.ofport),
        ));
    }

    flows.push(flow(0, 0, "actions=NORMAL"));
    flows
}
