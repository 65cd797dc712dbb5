// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The iptables skeleton of the gateway.
//!
//! The gateway creates its chains empty and hooks them into the built-in chains.
//! Service controllers fill the chains later, so applying a skeleton must never touch
//! rules it did not create.

use crate::RulesError;
use async_trait::async_trait;
use config::{GatewayConfig, GatewayMode, IpFamily};
use exec::{Cmd, Exec, ExecError};
use ipnet::IpNet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::debug;

pub const ETP_CHAIN: &str = "OVN-KUBE-ETP";
pub const EXTERNAL_IP_CHAIN: &str = "OVN-KUBE-EXTERNALIP";
pub const NODEPORT_CHAIN: &str = "OVN-KUBE-NODEPORT";
pub const ITP_CHAIN: &str = "OVN-KUBE-ITP";
pub const UDN_MASQUERADE_CHAIN: &str = "OVN-KUBE-UDN-MASQUERADE";

/// Prefix length of the masquerade range used by the default network
const DEFAULT_NETWORK_MASQUERADE_V4_LEN: u8 = 29;
const DEFAULT_NETWORK_MASQUERADE_V6_LEN: u8 = 125;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, strum::Display, strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Table {
    Nat,
    Filter,
    Mangle,
}

impl Table {
    #[must_use]
    pub fn builtin_chains(self) -> &'static [&'static str] {
        match self {
            Table::Nat => &["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"],
            Table::Filter => &["INPUT", "FORWARD", "OUTPUT"],
            Table::Mangle => &["PREROUTING", "INPUT", "FORWARD", "OUTPUT", "POSTROUTING"],
        }
    }

    #[must_use]
    pub fn is_builtin(self, chain: &str) -> bool {
        self.builtin_chains().contains(&chain)
    }
}

/// A user-defined chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IptChain {
    pub table: Table,
    pub name: String,
}

/// One rule, as the arguments following `-A <chain>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IptRule {
    pub table: Table,
    pub chain: String,
    pub args: Vec<String>,
}

impl IptRule {
    #[must_use]
    pub fn new(table: Table, chain: &str, args: &[&str]) -> Self {
        Self {
            table,
            chain: chain.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Display for IptRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// Chains and rules of one IP family, in the order they must be applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IptablesRuleset {
    pub chains: Vec<IptChain>,
    pub rules: Vec<IptRule>,
}

impl IptablesRuleset {
    fn chain(&mut self, table: Table, name: &str) {
        self.chains.push(IptChain {
            table,
            name: name.to_string(),
        });
    }

    fn rule(&mut self, table: Table, chain: &str, args: &[&str]) {
        self.rules.push(IptRule::new(table, chain, args));
    }

    /// Create missing chains, then append missing rules.
    pub async fn apply(&self, ipt: &dyn Iptables, family: IpFamily) -> Result<(), RulesError> {
        for chain in &self.chains {
            ipt.ensure_chain(family, chain.table, &chain.name).await?;
        }
        for rule in &self.rules {
            ipt.ensure_rule(family, rule).await?;
        }
        Ok(())
    }
}

fn accept_both_ways(rs: &mut IptablesRuleset, what: &str) {
    rs.rule(Table::Filter, "FORWARD", &["-d", what, "-j", "ACCEPT"]);
    rs.rule(Table::Filter, "FORWARD", &["-s", what, "-j", "ACCEPT"]);
}

/// The iptables skeleton of `family`.
#[must_use]
pub fn gateway_iptables(config: &GatewayConfig, family: IpFamily) -> IptablesRuleset {
    let mut rs = IptablesRuleset::default();
    let local = config.mode == GatewayMode::Local;
    let segmentation = config.features.network_segmentation;

    for chain in [NODEPORT_CHAIN, EXTERNAL_IP_CHAIN, ETP_CHAIN, ITP_CHAIN] {
        rs.chain(Table::Nat, chain);
    }
    rs.chain(Table::Mangle, ITP_CHAIN);
    if local && segmentation {
        rs.chain(Table::Nat, UDN_MASQUERADE_CHAIN);
    }

    for chain in [ETP_CHAIN, EXTERNAL_IP_CHAIN, NODEPORT_CHAIN] {
        rs.rule(Table::Nat, "PREROUTING", &["-j", chain]);
    }
    for chain in [EXTERNAL_IP_CHAIN, NODEPORT_CHAIN, ITP_CHAIN] {
        rs.rule(Table::Nat, "OUTPUT", &["-j", chain]);
    }
    rs.rule(Table::Mangle, "OUTPUT", &["-j", ITP_CHAIN]);

    if !local {
        return rs;
    }

    let masq = config.masquerade.ips(family);
    let ovn_masq = masq.ovn.to_string();
    rs.rule(Table::Nat, "POSTROUTING", &["-s", ovn_masq.as_str(), "-j", "MASQUERADE"]);
    if let Some(subnet) = config.host_subnet(family) {
        let subnet = subnet.to_string();
        rs.rule(Table::Nat, "POSTROUTING", &["-s", subnet.as_str(), "-j", "MASQUERADE"]);
    }

    let mgmt = config.mgmt_port_name.as_str();
    rs.rule(
        Table::Filter,
        "INPUT",
        &[
            "-i",
            mgmt,
            "-m",
            "comment",
            "--comment",
            "from OVN to localhost",
            "-j",
            "ACCEPT",
        ],
    );

    if config.features.disable_forwarding {
        accept_both_ways(&mut rs, &ovn_masq);
        for cidr in config.service_cidrs_of(family) {
            accept_both_ways(&mut rs, &cidr.to_string());
        }
        for subnet in config.cluster_subnets_of(family) {
            accept_both_ways(&mut rs, &subnet.to_string());
        }
        rs.rule(Table::Filter, "FORWARD", &["-i", mgmt, "-j", "ACCEPT"]);
        rs.rule(Table::Filter, "FORWARD", &["-o", mgmt, "-j", "ACCEPT"]);
    }

    if segmentation {
        rs.rule(Table::Nat, "POSTROUTING", &["-j", UDN_MASQUERADE_CHAIN]);
        let len = match family {
            IpFamily::V4 => DEFAULT_NETWORK_MASQUERADE_V4_LEN,
            IpFamily::V6 => DEFAULT_NETWORK_MASQUERADE_V6_LEN,
        };
        let default_network = IpNet::new(masq.subnet.network(), len.max(masq.subnet.prefix_len()))
            .map_or(masq.subnet, |n| n.trunc())
            .to_string();
        rs.rule(
            Table::Nat,
            UDN_MASQUERADE_CHAIN,
            &["-s", default_network.as_str(), "-j", "RETURN"],
        );
        for cidr in config.service_cidrs_of(family) {
            let cidr = cidr.to_string();
            rs.rule(Table::Nat, UDN_MASQUERADE_CHAIN, &["-d", cidr.as_str(), "-j", "RETURN"]);
        }
        let whole = masq.subnet.to_string();
        rs.rule(
            Table::Nat,
            UDN_MASQUERADE_CHAIN,
            &["-s", whole.as_str(), "-j", "MASQUERADE"],
        );
    }
    rs
}

/// Idempotent iptables operations.
#[async_trait]
pub trait Iptables: Send + Sync {
    async fn ensure_chain(
        &self,
        family: IpFamily,
        table: Table,
        chain: &str,
    ) -> Result<(), RulesError>;
    /// Append the rule unless an identical one is already in the chain
    async fn ensure_rule(&self, family: IpFamily, rule: &IptRule) -> Result<(), RulesError>;
}

/// Drives `iptables` and `ip6tables`.
pub struct IptablesCli {
    exec: Arc<dyn Exec>,
}

impl IptablesCli {
    #[must_use]
    pub fn new(exec: Arc<dyn Exec>) -> Self {
        Self { exec }
    }

    fn cmd(family: IpFamily, table: Table) -> Cmd {
        let program = match family {
            IpFamily::V4 => "iptables",
            IpFamily::V6 => "ip6tables",
        };
        Cmd::new(program).arg("-w").arg("-t").arg(<&str>::from(table))
    }

    /// Run a check; a non-zero exit means "no"
    async fn check(&self, cmd: &Cmd) -> Result<bool, RulesError> {
        match self.exec.run(cmd).await {
            Ok(_) => Ok(true),
            Err(ExecError::Failed { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Iptables for IptablesCli {
    async fn ensure_chain(
        &self,
        family: IpFamily,
        table: Table,
        chain: &str,
    ) -> Result<(), RulesError> {
        if table.is_builtin(chain) {
            return Ok(());
        }
        let list = Self::cmd(family, table).arg("-S").arg(chain);
        if self.check(&list).await? {
            return Ok(());
        }
        debug!("Creating {family} chain {table}/{chain}");
        self.exec
            .run(&Self::cmd(family, table).arg("-N").arg(chain))
            .await?;
        Ok(())
    }

    async fn ensure_rule(&self, family: IpFamily, rule: &IptRule) -> Result<(), RulesError> {
        let check = Self::cmd(family, rule.table)
            .arg("-C")
            .arg(rule.chain.as_str())
            .args(rule.args.iter().map(String::as_str));
        if self.check(&check).await? {
            return Ok(());
        }
        debug!("Appending {family} rule to {}/{}: {rule}", rule.table, rule.chain);
        let append = Self::cmd(family, rule.table)
            .arg("-A")
            .arg(rule.chain.as_str())
            .args(rule.args.iter().map(String::as_str));
        self.exec.run(&append).await?;
        Ok(())
    }
}
