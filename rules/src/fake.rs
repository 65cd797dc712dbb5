// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! In-memory packet filters.

use crate::ipt::{IptRule, Iptables, Table};
use crate::nft::{NFT_FAMILY, NFT_TABLE, NftRuleset, Nftables};
use crate::RulesError;
use async_trait::async_trait;
use config::IpFamily;
use ordermap::OrderMap;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct NftState {
    table: bool,
    /// Object declarations keyed by `<kind> <name>`, with the rules of chains
    objects: OrderMap<String, (String, Vec<String>)>,
}

/// Keeps the `inet ovn-kubernetes` table in memory.  Applies a rule set the way
/// `nft -f` would apply its script.
#[derive(Default)]
pub struct FakeNftables {
    state: Mutex<NftState>,
    applied: Mutex<usize>,
}

impl FakeNftables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `apply` calls
    #[must_use]
    pub fn applied(&self) -> usize {
        *self.applied.lock()
    }

    /// Current content, declarations each followed by their rules
    #[must_use]
    pub fn dump(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut lines = Vec::new();
        if state.table {
            lines.push(format!("add table {NFT_FAMILY} {NFT_TABLE}"));
        }
        for (decl, rules) in state.objects.values() {
            lines.push(decl.clone());
            lines.extend(rules.iter().cloned());
        }
        lines
    }

    fn exec_line(state: &mut NftState, line: &str) -> Result<(), RulesError> {
        let prefix_of = |verb: &str, kind: &str| format!("{verb} {kind} {NFT_FAMILY} {NFT_TABLE}");
        if line == prefix_of("add", "table") {
            state.table = true;
            return Ok(());
        }
        if !state.table {
            return Err(RulesError::Invalid(line.to_string()));
        }
        for kind in ["set", "map", "chain"] {
            if let Some(rest) = line.strip_prefix(&format!("{} ", prefix_of("add", kind))) {
                let name = rest.split_whitespace().next().unwrap_or_default();
                state
                    .objects
                    .entry(format!("{kind} {name}"))
                    .or_insert_with(|| (line.to_string(), Vec::new()));
                return Ok(());
            }
        }
        if let Some(chain) = line.strip_prefix(&format!("{} ", prefix_of("flush", "chain"))) {
            let (_, rules) = state
                .objects
                .get_mut(&format!("chain {}", chain.trim()))
                .ok_or_else(|| RulesError::NoSuchChain(chain.to_string()))?;
            rules.clear();
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix(&format!("{} ", prefix_of("add", "rule"))) {
            let chain = rest.split_whitespace().next().unwrap_or_default();
            let (_, rules) = state
                .objects
                .get_mut(&format!("chain {chain}"))
                .ok_or_else(|| RulesError::NoSuchChain(chain.to_string()))?;
            rules.push(line.to_string());
            return Ok(());
        }
        Err(RulesError::Invalid(line.to_string()))
    }
}

#[async_trait]
impl Nftables for FakeNftables {
    async fn apply(&self, ruleset: &NftRuleset) -> Result<(), RulesError> {
        let script = ruleset.to_script();
        let mut state = self.state.lock();
        // a failing script leaves nothing behind, like an nft transaction
        let mut scratch = NftState {
            table: state.table,
            objects: state.objects.clone(),
        };
        for line in script.lines() {
            Self::exec_line(&mut scratch, line)?;
        }
        *state = scratch;
        *self.applied.lock() += 1;
        Ok(())
    }
}

type IptTable = OrderMap<String, Vec<String>>;

/// Keeps iptables chains in memory, per family and table.  Built-in chains spring into
/// existence when first used.
#[derive(Default)]
pub struct FakeIptables {
    tables: Mutex<HashMap<(IpFamily, Table), IptTable>>,
}

impl FakeIptables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Chains and their rules, in creation order
    #[must_use]
    pub fn table(&self, family: IpFamily, table: Table) -> IptTable {
        self.tables
            .lock()
            .get(&(family, table))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Iptables for FakeIptables {
    async fn ensure_chain(
        &self,
        family: IpFamily,
        table: Table,
        chain: &str,
    ) -> Result<(), RulesError> {
        self.tables
            .lock()
            .entry((family, table))
            .or_default()
            .entry(chain.to_string())
            .or_default();
        Ok(())
    }

    async fn ensure_rule(&self, family: IpFamily, rule: &IptRule) -> Result<(), RulesError> {
        let mut tables = self.tables.lock();
        let chains = tables.entry((family, rule.table)).or_default();
        if !chains.contains_key(&rule.chain) && !rule.table.is_builtin(&rule.chain) {
            return Err(RulesError::NoSuchChain(rule.chain.clone()));
        }
        let rules = chains.entry(rule.chain.clone()).or_default();
        let rendered = rule.to_string();
        if !rules.contains(&rendered) {
            rules.push(rendered);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nft::{base_ruleset, udn_ruleset};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_reapplying_keeps_one_copy() {
        let nft = FakeNftables::new();
        let mut rs = base_ruleset("ovn-k8s-mp0", &["10.1.1.2".parse().unwrap()]);
        rs.extend(udn_ruleset("ovn-k8s-mp0"));
        nft.apply(&rs).await.unwrap();
        nft.apply(&rs).await.unwrap();
        assert_eq!(nft.dump(), rs.lines());
        assert_eq!(nft.applied(), 2);
    }

    #[tokio::test]
    async fn test_rules_need_their_chain() {
        let nft = FakeNftables::new();
        let rs = udn_ruleset("ovn-k8s-mp0");
        // no table declared
        assert!(nft.apply(&rs).await.is_err());
        assert!(nft.dump().is_empty());
    }
}
