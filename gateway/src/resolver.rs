// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Selection of the gateway interface and its next hops.

use crate::ResolveError;
use config::{GatewayConfig, GatewayMode, IpFamily};
use interface_manager::{Netlink, RouteFilter};
use ipnet::IpNet;
use ovs::Ovs;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Gateway interface and next hops, IPv4 first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub interface: String,
    pub next_hops: Vec<IpAddr>,
}

/// The default route of one family
#[derive(Clone, Debug, PartialEq, Eq)]
struct DefaultGateway {
    link: String,
    next_hop: IpAddr,
}

pub struct NextHopResolver {
    ovs: Ovs,
    netlink: Arc<dyn Netlink>,
}

impl NextHopResolver {
    #[must_use]
    pub fn new(ovs: Ovs, netlink: Arc<dyn Netlink>) -> Self {
        Self { ovs, netlink }
    }

    /// Work out the gateway interface and next hops from the configuration and the
    /// default routes of the node.
    pub async fn resolve(&self, config: &GatewayConfig) -> Result<Resolved, ResolveError> {
        let families = config.families();
        let mut next_hops = config.next_hops.clone();
        let mut interface = config.interface.clone();

        if let Some(configured) = &interface
            && let Some(bridge) = self.ovs.port_to_bridge(configured).await
        {
            debug!("Gateway interface {configured} is a port of bridge {bridge}");
            interface = Some(bridge);
        }

        let missing: Vec<IpFamily> = families
            .iter()
            .copied()
            .filter(|family| !next_hops.iter().any(|hop| IpFamily::of(hop) == *family))
            .collect();
        if let Some(configured) = &interface
            && missing.is_empty()
        {
            return Ok(Resolved {
                interface: configured.clone(),
                next_hops,
            });
        }

        let (default_link, default_hops) =
            match self.default_gateways(interface.as_deref(), &families).await {
                Ok(found) => found,
                Err(e) if config.mode == GatewayMode::Local && config.allow_no_uplink => {
                    warn!("Ignoring default route lookup failure: {e}");
                    (None, vec![])
                }
                Err(e) => return Err(e),
            };

        let interface = match interface {
            None => default_link.ok_or(ResolveError::NoGatewayInterface)?,
            Some(configured)
                if config.mode == GatewayMode::Local
                    && default_link.as_deref() != Some(configured.as_str()) =>
            {
                let dummies: Vec<IpAddr> = families
                    .iter()
                    .map(|family| config.masquerade.ips(*family).dummy_next_hop)
                    .collect();
                info!(
                    "Gateway interface {configured} carries no default route, using next hops {dummies:?}"
                );
                return Ok(Resolved {
                    interface: configured,
                    next_hops: dummies,
                });
            }
            Some(configured) => configured,
        };

        for hop in default_hops {
            if missing.contains(&IpFamily::of(&hop)) {
                debug!("Using default route next hop {hop}");
                next_hops.push(hop);
            }
        }
        next_hops.sort_by_key(IpAddr::is_ipv6);
        Ok(Resolved {
            interface,
            next_hops,
        })
    }

    /// Default route link and next hops over `families`.  The links of both families
    /// must agree with each other and with `configured`, when given.
    async fn default_gateways(
        &self,
        configured: Option<&str>,
        families: &[IpFamily],
    ) -> Result<(Option<String>, Vec<IpAddr>), ResolveError> {
        let mut link: Option<String> = None;
        let mut hops = Vec::new();
        for family in families {
            let Some(found) = self.default_gateway(*family).await? else {
                debug!("No {family} default route");
                continue;
            };
            if let Some(configured) = configured
                && configured != found.link
            {
                return Err(ResolveError::GatewayInterfaceMismatch {
                    configured: configured.to_string(),
                    found: found.link,
                });
            }
            match &link {
                Some(previous) if *previous != found.link => {
                    return Err(ResolveError::GatewayInterfaceMismatch {
                        configured: previous.clone(),
                        found: found.link,
                    });
                }
                Some(_) => {}
                None => link = Some(found.link),
            }
            hops.push(found.next_hop);
        }
        Ok((link, hops))
    }

    async fn default_gateway(
        &self,
        family: IpFamily,
    ) -> Result<Option<DefaultGateway>, ResolveError> {
        let routes = self
            .netlink
            .routes(&RouteFilter::default_route(family))
            .await?;
        for route in routes {
            let Some(next_hop) = route.gateway else {
                continue;
            };
            let link = self.netlink.link_by_index(route.link_index).await?;
            return Ok(Some(DefaultGateway {
                link: link.name,
                next_hop,
            }));
        }
        Ok(None)
    }

    /// The link carrying `ip`, with the address as configured on it.
    pub async fn interface_by_ip(&self, ip: IpAddr) -> Result<(String, IpNet), ResolveError> {
        let addrs = self
            .netlink
            .addresses(None, Some(IpFamily::of(&ip)))
            .await?;
        let Some(found) = addrs.into_iter().find(|a| a.addr.addr() == ip) else {
            return Err(ResolveError::NoInterfaceForIp(ip));
        };
        let link = self.netlink.link_by_index(found.link_index).await?;
        Ok((link.name, found.addr))
    }
}
