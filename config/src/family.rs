// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// IP address family.  `V4` sorts before `V6`, which is the order every per-family
/// list in the gateway is kept in.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum IpFamily {
    #[strum(serialize = "IPv4")]
    V4,
    #[strum(serialize = "IPv6")]
    V6,
}

impl IpFamily {
    #[must_use]
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    #[must_use]
    pub fn of_net(net: &IpNet) -> Self {
        match net {
            IpNet::V4(_) => IpFamily::V4,
            IpNet::V6(_) => IpFamily::V6,
        }
    }

    /// Host prefix length for this family (32 or 128)
    #[must_use]
    pub fn host_prefix_len(self) -> u8 {
        match self {
            IpFamily::V4 => 32,
            IpFamily::V6 => 128,
        }
    }

    /// Short suffix used in per-family object names (`v4`, `v6`)
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            IpFamily::V4 => "v4",
            IpFamily::V6 => "v6",
        }
    }

    /// The single-address network for `addr`
    #[must_use]
    pub fn host_net(addr: IpAddr) -> IpNet {
        IpNet::from(addr)
    }
}
