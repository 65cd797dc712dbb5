// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration errors

use crate::gateway::GatewayConfigBuilderError;
use crate::IpFamily;
use ipnet::IpNet;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing or incomplete gateway configuration: {0}")]
    Incomplete(#[from] GatewayConfigBuilderError),
    #[error("Duplicate {0} for IP family {1}")]
    DuplicateFamily(&'static str, IpFamily),
    #[error("Next hop family {0} has no matching host subnet")]
    NextHopWithoutSubnet(IpFamily),
    #[error("No host subnets configured")]
    NoHostSubnets,
    #[error("Masquerade subnet {0} is too small: it must hold at least {1} addresses")]
    MasqueradeSubnetTooSmall(IpNet, u32),
    #[error("VLAN id {0} is out of range (1-4094)")]
    InvalidVlan(u16),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result-like type for configurations
pub type ConfigResult = Result<(), ConfigError>;
