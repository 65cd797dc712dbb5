// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! nftables rules of the `inet ovn-kubernetes` table.

use crate::RulesError;
use async_trait::async_trait;
use config::{GatewayConfig, IpFamily};
use exec::{Cmd, Exec};
use std::fmt::Write;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

pub const NFT_FAMILY: &str = "inet";
pub const NFT_TABLE: &str = "ovn-kubernetes";

pub const MGMT_PORT_SNAT_CHAIN: &str = "mgmtport-snat";
pub const NO_SNAT_NODEPORTS: &str = "mgmtport-no-snat-nodeports";
pub const NO_SNAT_SERVICES_V4: &str = "mgmtport-no-snat-services-v4";
pub const NO_SNAT_SERVICES_V6: &str = "mgmtport-no-snat-services-v6";
pub const NO_SNAT_SUBNETS_V4: &str = "mgmtport-no-snat-subnets-v4";
pub const NO_SNAT_SUBNETS_V6: &str = "mgmtport-no-snat-subnets-v6";

pub const UDN_MARK_NODEPORTS: &str = "udn-mark-nodeports";
pub const UDN_MARK_EXTERNAL_IPS_V4: &str = "udn-mark-external-ips-v4";
pub const UDN_MARK_EXTERNAL_IPS_V6: &str = "udn-mark-external-ips-v6";
pub const UDN_SERVICE_MARK_CHAIN: &str = "udn-service-mark";
pub const UDN_SERVICE_PREROUTING_CHAIN: &str = "udn-service-prerouting";
pub const UDN_SERVICE_OUTPUT_CHAIN: &str = "udn-service-output";

/// An ordered list of `nft` commands, one object or rule per line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NftRuleset {
    lines: Vec<String>,
}

impl NftRuleset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn extend(&mut self, other: NftRuleset) {
        self.lines.extend(other.lines);
    }

    fn add_table(&mut self) {
        self.lines.push(format!("add table {NFT_FAMILY} {NFT_TABLE}"));
    }

    fn add_object(&mut self, kind: &str, name: &str, spec: &str, comment: &str) {
        let spec = if spec.is_empty() {
            String::new()
        } else {
            format!("{spec} ; ")
        };
        self.lines.push(format!(
            "add {kind} {NFT_FAMILY} {NFT_TABLE} {name} {{ {spec}comment \"{comment}\" ; }}"
        ));
    }

    fn add_rule(&mut self, chain: &str, rule: &str) {
        self.lines
            .push(format!("add rule {NFT_FAMILY} {NFT_TABLE} {chain} {rule}"));
    }

    /// The script fed to `nft -f -`.  Every chain is flushed right after it is
    /// declared so that applying the script twice leaves a single copy of each rule.
    #[must_use]
    pub fn to_script(&self) -> String {
        let mut script = String::new();
        for line in &self.lines {
            script.push_str(line);
            script.push('\n');
            if let Some(chain) = line
                .strip_prefix(&format!("add chain {NFT_FAMILY} {NFT_TABLE} "))
                .and_then(|rest| rest.split_whitespace().next())
            {
                let _ = writeln!(script, "flush chain {NFT_FAMILY} {NFT_TABLE} {chain}");
            }
        }
        script
    }
}

fn ip_keyword(family: IpFamily) -> &'static str {
    match family {
        IpFamily::V4 => "ip",
        IpFamily::V6 => "ip6",
    }
}

/// Sets and SNAT chain of the management port.  `mgmt_ips` holds the management port
/// address of each enabled family, IPv4 first.
#[must_use]
pub fn base_ruleset(mgmt_port: &str, mgmt_ips: &[IpAddr]) -> NftRuleset {
    let mut rs = NftRuleset::new();
    rs.add_table();
    rs.add_object(
        "set",
        NO_SNAT_NODEPORTS,
        "type inet_proto . inet_service",
        "NodePorts not subject to management port SNAT",
    );
    rs.add_object(
        "set",
        NO_SNAT_SERVICES_V4,
        "type ipv4_addr . inet_proto . inet_service",
        "eTP:Local short-circuit not subject to management port SNAT (IPv4)",
    );
    rs.add_object(
        "set",
        NO_SNAT_SERVICES_V6,
        "type ipv6_addr . inet_proto . inet_service",
        "eTP:Local short-circuit not subject to management port SNAT (IPv6)",
    );
    rs.add_object(
        "set",
        NO_SNAT_SUBNETS_V4,
        "type ipv4_addr ; flags interval",
        "subnets not subject to management port SNAT (IPv4)",
    );
    rs.add_object(
        "set",
        NO_SNAT_SUBNETS_V6,
        "type ipv6_addr ; flags interval",
        "subnets not subject to management port SNAT (IPv6)",
    );
    rs.add_object(
        "chain",
        MGMT_PORT_SNAT_CHAIN,
        "type nat hook postrouting priority 100",
        "OVN SNAT to Management Port",
    );

    let families: Vec<(IpFamily, IpAddr)> =
        mgmt_ips.iter().map(|ip| (IpFamily::of(ip), *ip)).collect();

    rs.add_rule(MGMT_PORT_SNAT_CHAIN, &format!("oifname != {mgmt_port} return"));
    for (family, ip) in &families {
        let nfproto = match family {
            IpFamily::V4 => "ipv4",
            IpFamily::V6 => "ipv6",
        };
        rs.add_rule(
            MGMT_PORT_SNAT_CHAIN,
            &format!(
                "meta nfproto {nfproto} {} saddr {ip} counter return",
                ip_keyword(*family)
            ),
        );
    }
    rs.add_rule(
        MGMT_PORT_SNAT_CHAIN,
        &format!("meta l4proto . th dport @{NO_SNAT_NODEPORTS} counter return"),
    );
    for (family, _) in &families {
        let set = match family {
            IpFamily::V4 => NO_SNAT_SERVICES_V4,
            IpFamily::V6 => NO_SNAT_SERVICES_V6,
        };
        rs.add_rule(
            MGMT_PORT_SNAT_CHAIN,
            &format!(
                "{} daddr . meta l4proto . th dport @{set} counter return",
                ip_keyword(*family)
            ),
        );
    }
    for (family, _) in &families {
        let set = match family {
            IpFamily::V4 => NO_SNAT_SUBNETS_V4,
            IpFamily::V6 => NO_SNAT_SUBNETS_V6,
        };
        rs.add_rule(
            MGMT_PORT_SNAT_CHAIN,
            &format!("{} saddr @{set} counter return", ip_keyword(*family)),
        );
    }
    for (family, ip) in &families {
        let kw = ip_keyword(*family);
        rs.add_rule(MGMT_PORT_SNAT_CHAIN, &format!("counter snat {kw} to {ip}"));
    }
    rs
}

/// Maps and chains marking traffic towards services of user-defined networks.
#[must_use]
pub fn udn_ruleset(mgmt_port: &str) -> NftRuleset {
    let mut rs = NftRuleset::new();
    rs.add_object(
        "map",
        UDN_MARK_NODEPORTS,
        "type inet_proto . inet_service : verdict",
        "UDN services NodePorts mark",
    );
    rs.add_object(
        "map",
        UDN_MARK_EXTERNAL_IPS_V4,
        "type ipv4_addr . inet_proto . inet_service : verdict",
        "UDN services External IPs mark (IPv4)",
    );
    rs.add_object(
        "map",
        UDN_MARK_EXTERNAL_IPS_V6,
        "type ipv6_addr . inet_proto . inet_service : verdict",
        "UDN services External IPs mark (IPv6)",
    );
    rs.add_object("chain", UDN_SERVICE_MARK_CHAIN, "", "UDN services packet mark");
    rs.add_rule(
        UDN_SERVICE_MARK_CHAIN,
        &format!("fib daddr type local meta l4proto . th dport vmap @{UDN_MARK_NODEPORTS}"),
    );
    rs.add_rule(
        UDN_SERVICE_MARK_CHAIN,
        &format!("ip daddr . meta l4proto . th dport vmap @{UDN_MARK_EXTERNAL_IPS_V4}"),
    );
    rs.add_rule(
        UDN_SERVICE_MARK_CHAIN,
        &format!("ip6 daddr . meta l4proto . th dport vmap @{UDN_MARK_EXTERNAL_IPS_V6}"),
    );
    rs.add_object(
        "chain",
        UDN_SERVICE_PREROUTING_CHAIN,
        "type filter hook prerouting priority -150",
        "UDN services packet mark - Prerouting",
    );
    rs.add_rule(
        UDN_SERVICE_PREROUTING_CHAIN,
        &format!("iifname != {mgmt_port} jump {UDN_SERVICE_MARK_CHAIN}"),
    );
    rs.add_object(
        "chain",
        UDN_SERVICE_OUTPUT_CHAIN,
        "type filter hook output priority -150",
        "UDN services packet mark - Output",
    );
    rs.add_rule(
        UDN_SERVICE_OUTPUT_CHAIN,
        &format!("jump {UDN_SERVICE_MARK_CHAIN}"),
    );
    rs
}

/// The complete nftables rule set of the gateway.  Segmentation rules come strictly
/// after the base rules.
#[must_use]
pub fn gateway_ruleset(config: &GatewayConfig) -> NftRuleset {
    let mgmt_ips: Vec<IpAddr> = config
        .families()
        .into_iter()
        .filter_map(|family| config.mgmt_port_ip(family))
        .collect();
    let mut rs = base_ruleset(&config.mgmt_port_name, &mgmt_ips);
    if config.features.network_segmentation {
        rs.extend(udn_ruleset(&config.mgmt_port_name));
    }
    rs
}

/// Applies rule sets to the kernel.
#[async_trait]
pub trait Nftables: Send + Sync {
    async fn apply(&self, ruleset: &NftRuleset) -> Result<(), RulesError>;
}

/// Applies rule sets with `nft -f -` in a single transaction.
pub struct NftCli {
    exec: Arc<dyn Exec>,
}

impl NftCli {
    #[must_use]
    pub fn new(exec: Arc<dyn Exec>) -> Self {
        Self { exec }
    }
}

#[async_trait]
impl Nftables for NftCli {
    async fn apply(&self, ruleset: &NftRuleset) -> Result<(), RulesError> {
        debug!("Applying {} nftables commands", ruleset.len());
        let cmd = Cmd::new("nft").args(["-f", "-"]).stdin(ruleset.to_script());
        self.exec.run(&cmd).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{GatewayConfigBuilder, GatewayMode};
    use exec::FakeExec;
    use pretty_assertions::assert_eq;

    const BASE_V4: &str = r#"add table inet ovn-kubernetes
add set inet ovn-kubernetes mgmtport-no-snat-nodeports { type inet_proto . inet_service ; comment "NodePorts not subject to management port SNAT" ; }
add set inet ovn-kubernetes mgmtport-no-snat-services-v4 { type ipv4_addr . inet_proto . inet_service ; comment "eTP:Local short-circuit not subject to management port SNAT (IPv4)" ; }
add set inet ovn-kubernetes mgmtport-no-snat-services-v6 { type ipv6_addr . inet_proto . inet_service ; comment "eTP:Local short-circuit not subject to management port SNAT (IPv6)" ; }
add set inet ovn-kubernetes mgmtport-no-snat-subnets-v4 { type ipv4_addr ; flags interval ; comment "subnets not subject to management port SNAT (IPv4)" ; }
add set inet ovn-kubernetes mgmtport-no-snat-subnets-v6 { type ipv6_addr ; flags interval ; comment "subnets not subject to management port SNAT (IPv6)" ; }
add chain inet ovn-kubernetes mgmtport-snat { type nat hook postrouting priority 100 ; comment "OVN SNAT to Management Port" ; }
add rule inet ovn-kubernetes mgmtport-snat oifname != ovn-k8s-mp0 return
add rule inet ovn-kubernetes mgmtport-snat meta nfproto ipv4 ip saddr 10.1.1.2 counter return
add rule inet ovn-kubernetes mgmtport-snat meta l4proto . th dport @mgmtport-no-snat-nodeports counter return
add rule inet ovn-kubernetes mgmtport-snat ip daddr . meta l4proto . th dport @mgmtport-no-snat-services-v4 counter return
add rule inet ovn-kubernetes mgmtport-snat ip saddr @mgmtport-no-snat-subnets-v4 counter return
add rule inet ovn-kubernetes mgmtport-snat counter snat ip to 10.1.1.2"#;

    const UDN: &str = r#"add map inet ovn-kubernetes udn-mark-nodeports { type inet_proto . inet_service : verdict ; comment "UDN services NodePorts mark" ; }
add map inet ovn-kubernetes udn-mark-external-ips-v4 { type ipv4_addr . inet_proto . inet_service : verdict ; comment "UDN services External IPs mark (IPv4)" ; }
add map inet ovn-kubernetes udn-mark-external-ips-v6 { type ipv6_addr . inet_proto . inet_service : verdict ; comment "UDN services External IPs mark (IPv6)" ; }
add chain inet ovn-kubernetes udn-service-mark { comment "UDN services packet mark" ; }
add rule inet ovn-kubernetes udn-service-mark fib daddr type local meta l4proto . th dport vmap @udn-mark-nodeports
add rule inet ovn-kubernetes udn-service-mark ip daddr . meta l4proto . th dport vmap @udn-mark-external-ips-v4
add rule inet ovn-kubernetes udn-service-mark ip6 daddr . meta l4proto . th dport vmap @udn-mark-external-ips-v6
add chain inet ovn-kubernetes udn-service-prerouting { type filter hook prerouting priority -150 ; comment "UDN services packet mark - Prerouting" ; }
add rule inet ovn-kubernetes udn-service-prerouting iifname != ovn-k8s-mp0 jump udn-service-mark
add chain inet ovn-kubernetes udn-service-output { type filter hook output priority -150 ; comment "UDN services packet mark - Output" ; }
add rule inet ovn-kubernetes udn-service-output jump udn-service-mark"#;

    fn builder(subnets: &[&str]) -> GatewayConfigBuilder {
        let mut builder = GatewayConfigBuilder::default();
        builder
            .mode(GatewayMode::Shared)
            .node_name("node1")
            .host_subnets(subnets.iter().map(|s| s.parse().unwrap()).collect());
        builder
    }

    #[test]
    fn ipv4_base_rules() {
        let config = builder(&["10.1.1.0/24"]).build().unwrap();
        let rs = gateway_ruleset(&config);
        assert_eq!(rs.lines().join("\n"), BASE_V4);
        assert_eq!(rs, gateway_ruleset(&config));
    }

    #[test]
    fn segmentation_is_strictly_additive() {
        let features = config::Features {
            network_segmentation: true,
            ..Default::default()
        };
        let base = gateway_ruleset(&builder(&["10.1.1.0/24"]).build().unwrap());
        let with_udn = gateway_ruleset(
            &builder(&["10.1.1.0/24"])
                .features(features)
                .build()
                .unwrap(),
        );
        assert_eq!(&with_udn.lines()[..base.len()], base.lines());
        assert_eq!(with_udn.lines()[base.len()..].join("\n"), UDN);
    }

    #[test]
    fn dual_stack_rules_are_grouped_by_kind() {
        let config = builder(&["10.1.1.0/24", "fd00:10:1:1::/64"]).build().unwrap();
        let ruleset = gateway_ruleset(&config);
        let rules: Vec<&str> = ruleset
            .lines()
            .iter()
            .filter_map(|l| l.strip_prefix("add rule inet ovn-kubernetes mgmtport-snat "))
            .collect();
        assert_eq!(
            rules,
            vec![
                "oifname != ovn-k8s-mp0 return",
                "meta nfproto ipv4 ip saddr 10.1.1.2 counter return",
                "meta nfproto ipv6 ip6 saddr fd00:10:1:1::2 counter return",
                "meta l4proto . th dport @mgmtport-no-snat-nodeports counter return",
                "ip daddr . meta l4proto . th dport @mgmtport-no-snat-services-v4 counter return",
                "ip6 daddr . meta l4proto . th dport @mgmtport-no-snat-services-v6 counter return",
                "ip saddr @mgmtport-no-snat-subnets-v4 counter return",
                "ip6 saddr @mgmtport-no-snat-subnets-v6 counter return",
                "counter snat ip to 10.1.1.2",
                "counter snat ip6 to fd00:10:1:1::2",
            ]
        );
    }

    #[test]
    fn script_flushes_every_chain() {
        let rs = udn_ruleset("ovn-k8s-mp0");
        let script = rs.to_script();
        let flushes: Vec<&str> = script
            .lines()
            .filter(|l| l.starts_with("flush chain"))
            .collect();
        assert_eq!(
            flushes,
            vec![
                "flush chain inet ovn-kubernetes udn-service-mark",
                "flush chain inet ovn-kubernetes udn-service-prerouting",
                "flush chain inet ovn-kubernetes udn-service-output",
            ]
        );
        let mark = script
            .lines()
            .position(|l| l.starts_with("add chain inet ovn-kubernetes udn-service-mark"))
            .unwrap();
        assert_eq!(
            script.lines().nth(mark + 1),
            Some("flush chain inet ovn-kubernetes udn-service-mark")
        );
    }

    #[tokio::test]
    async fn test_cli_feeds_script() {
        let exec = Arc::new(FakeExec::strict());
        exec.expect("nft -f -", "");
        let rs = udn_ruleset("ovn-k8s-mp0");
        NftCli::new(exec.clone()).apply(&rs).await.unwrap();
        assert_eq!(exec.calls()[0].stdin, Some(rs.to_script()));
    }
}
