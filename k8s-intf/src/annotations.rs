// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Codecs of the node annotations owned by the gateway.

use crate::StoreError;
use config::consts::annotations::{
    CHASSIS_ID, DEFAULT_NETWORK, GATEWAY_MTU_SUPPORT, L3_GATEWAY_CONFIG, MASQUERADE_SUBNET,
};
use config::{GatewayMode, IpFamily, MasqueradeConfig};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// How other cluster components reach this node's gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct L3GatewayConfig {
    pub mode: GatewayMode,
    pub interface_id: String,
    pub mac_address: String,
    pub ip_addresses: Vec<IpNet>,
    pub next_hops: Vec<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chassis_id: Option<String>,
    /// The API carries it as a string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port_enable: Option<String>,
}

impl L3GatewayConfig {
    /// The annotation value: the config keyed by network name
    pub fn to_annotation(&self) -> Result<String, StoreError> {
        let keyed = BTreeMap::from([(DEFAULT_NETWORK, self)]);
        serde_json::to_string(&keyed).map_err(|e| StoreError::Annotation(L3_GATEWAY_CONFIG, e))
    }

    /// Extract the default network's config from an annotation value
    pub fn from_annotation(value: &str) -> Result<Option<Self>, StoreError> {
        let mut keyed: BTreeMap<String, Self> = serde_json::from_str(value)
            .map_err(|e| StoreError::Annotation(L3_GATEWAY_CONFIG, e))?;
        Ok(keyed.remove(DEFAULT_NETWORK))
    }
}

/// The masquerade subnets a node was last configured with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasqueradeSubnets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<IpNet>,
}

impl MasqueradeSubnets {
    #[must_use]
    pub fn from_config(config: &MasqueradeConfig, families: &[IpFamily]) -> Self {
        let mut subnets = Self::default();
        for family in families {
            match family {
                IpFamily::V4 => subnets.ipv4 = Some(config.subnet(IpFamily::V4)),
                IpFamily::V6 => subnets.ipv6 = Some(config.subnet(IpFamily::V6)),
            }
        }
        subnets
    }

    #[must_use]
    pub fn get(&self, family: IpFamily) -> Option<IpNet> {
        match family {
            IpFamily::V4 => self.ipv4,
            IpFamily::V6 => self.ipv6,
        }
    }

    pub fn to_annotation(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|e| StoreError::Annotation(MASQUERADE_SUBNET, e))
    }

    pub fn from_annotation(value: &str) -> Result<Self, StoreError> {
        serde_json::from_str(value).map_err(|e| StoreError::Annotation(MASQUERADE_SUBNET, e))
    }
}

/// Value of the MTU support annotation; `None` removes it
#[must_use]
pub fn mtu_support_value(supported: bool) -> Option<String> {
    if supported {
        None
    } else {
        Some("false".to_string())
    }
}

/// Annotation keys written by the gateway at initialization.
pub const INIT_ANNOTATIONS: [&str; 3] = [L3_GATEWAY_CONFIG, CHASSIS_ID, GATEWAY_MTU_SUPPORT];
