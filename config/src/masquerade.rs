// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Masquerade subnets and the well-known addresses carved out of them.

use crate::{ConfigError, ConfigResult, IpFamily};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Number of addresses reserved at the start of a masquerade subnet
/// (network address plus the five well-known addresses)
const RESERVED_ADDRESSES: u32 = 6;

/// The masquerade subnets, one per IP family.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MasqueradeConfig {
    pub v4_subnet: Ipv4Net,
    pub v6_subnet: Ipv6Net,
}

impl Default for MasqueradeConfig {
    fn default() -> Self {
        Self {
            v4_subnet: Ipv4Net::new_assert(Ipv4Addr::new(169, 254, 169, 0), 29),
            v6_subnet: Ipv6Net::new_assert(Ipv6Addr::new(0xfd69, 0, 0, 0, 0, 0, 0, 0), 125),
        }
    }
}

/// Well-known masquerade addresses of one IP family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MasqueradeIps {
    pub subnet: IpNet,
    /// SNAT address of traffic from OVN towards the host
    pub ovn: IpAddr,
    /// SNAT address of traffic from the host towards OVN
    pub host: IpAddr,
    /// Host address used for externalTrafficPolicy=local short-circuit
    pub host_etp_local: IpAddr,
    /// Next hop placeholder used when the node has no physical uplink
    pub dummy_next_hop: IpAddr,
    /// OVN address used for service hairpin traffic
    pub ovn_hairpin: IpAddr,
}

impl MasqueradeConfig {
    #[must_use]
    pub fn subnet(&self, family: IpFamily) -> IpNet {
        match family {
            IpFamily::V4 => IpNet::V4(self.v4_subnet),
            IpFamily::V6 => IpNet::V6(self.v6_subnet),
        }
    }

    /// Well-known addresses of `family`, taken in order from the start of the subnet.
    #[must_use]
    pub fn ips(&self, family: IpFamily) -> MasqueradeIps {
        MasqueradeIps {
            subnet: self.subnet(family).trunc(),
            ovn: self.nth(family, 1),
            host: self.nth(family, 2),
            host_etp_local: self.nth(family, 3),
            dummy_next_hop: self.nth(family, 4),
            ovn_hairpin: self.nth(family, 5),
        }
    }

    fn nth(&self, family: IpFamily, n: u32) -> IpAddr {
        match family {
            IpFamily::V4 => {
                IpAddr::V4(Ipv4Addr::from(u32::from(self.v4_subnet.network()) + n))
            }
            IpFamily::V6 => {
                IpAddr::V6(Ipv6Addr::from(u128::from(self.v6_subnet.network()) + u128::from(n)))
            }
        }
    }

    /// Both subnets must be able to hold the reserved addresses.
    pub fn validate(&self) -> ConfigResult {
        let v4_capacity = 1u64 << (32 - u32::from(self.v4_subnet.prefix_len()));
        if v4_capacity < u64::from(RESERVED_ADDRESSES) {
            return Err(ConfigError::MasqueradeSubnetTooSmall(
                IpNet::V4(self.v4_subnet),
                RESERVED_ADDRESSES,
            ));
        }
        if self.v6_subnet.prefix_len() > 125 {
            return Err(ConfigError::MasqueradeSubnetTooSmall(
                IpNet::V6(self.v6_subnet),
                RESERVED_ADDRESSES,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_well_known_addresses() {
        let masq = MasqueradeConfig::default();
        let v4 = masq.ips(IpFamily::V4);
        assert_eq!(v4.ovn, "169.254.169.1".parse::<IpAddr>().unwrap());
        assert_eq!(v4.host, "169.254.169.2".parse::<IpAddr>().unwrap());
        assert_eq!(v4.host_etp_local, "169.254.169.3".parse::<IpAddr>().unwrap());
        assert_eq!(v4.dummy_next_hop, "169.254.169.4".parse::<IpAddr>().unwrap());
        assert_eq!(v4.ovn_hairpin, "169.254.169.5".parse::<IpAddr>().unwrap());

        let v6 = masq.ips(IpFamily::V6);
        assert_eq!(v6.ovn, "fd69::1".parse::<IpAddr>().unwrap());
        assert_eq!(v6.dummy_next_hop, "fd69::4".parse::<IpAddr>().unwrap());
        assert_eq!(v6.subnet, "fd69::/125".parse::<IpNet>().unwrap());
    }

    #[test]
    fn tiny_subnets_are_rejected() {
        let masq = MasqueradeConfig {
            v4_subnet: "169.254.169.0/30".parse().unwrap(),
            ..MasqueradeConfig::default()
        };
        assert!(masq.validate().is_err());
        assert!(MasqueradeConfig::default().validate().is_ok());
    }
}
