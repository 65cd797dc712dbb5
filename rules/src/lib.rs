// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet filter rule sets of the node gateway.
//!
//! The builders in [`nft`] and [`ipt`] are pure: they turn the gateway configuration into
//! an ordered list of objects and rules.  Applying them is the job of an engine
//! ([`Nftables`], [`Iptables`]), which has a command line implementation and, with the
//! `testing` feature, an in-memory fake.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod errors;
#[cfg(any(test, feature = "testing"))]
mod fake;
pub mod ipt;
pub mod nft;

pub use errors::RulesError;
#[cfg(any(test, feature = "testing"))]
pub use fake::{FakeIptables, FakeNftables};
pub use ipt::{IptChain, IptRule, Iptables, IptablesCli, IptablesRuleset, Table};
pub use nft::{NftCli, NftRuleset, Nftables};

use tracectl::trace_target;
trace_target!("rules", LevelFilter::INFO, &["nftables", "iptables"]);
