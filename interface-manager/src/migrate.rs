// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{IfAddr, Netlink, NetlinkError, Route, RouteFilter};
use ipnet::IpNet;
use tracing::{debug, info};

fn is_link_local(net: &IpNet) -> bool {
    match net {
        IpNet::V4(_) => false,
        IpNet::V6(v6) => v6.addr().is_unicast_link_local(),
    }
}

/// Move the IP configuration of `from` onto `to`: MAC, addresses and routes.
///
/// Used when an uplink is enslaved to a freshly created bridge.  IPv6 link-local
/// addresses and routes stay where they are.  Safe to repeat.
pub async fn migrate_ip_config(
    netlink: &dyn Netlink,
    from: &str,
    to: &str,
) -> Result<(), NetlinkError> {
    let uplink = netlink.link_by_name(from).await?;
    let bridge = netlink.link_by_name(to).await?;
    info!("Moving IP configuration from {from} to {to}");

    if let Some(mac) = uplink.mac
        && bridge.mac != Some(mac)
    {
        netlink.link_set_mac(bridge.index, mac).await?;
    }
    netlink.link_set_up(bridge.index).await?;

    // removing the addresses flushes the routes, so take them first
    let routes: Vec<Route> = netlink
        .routes(&RouteFilter::link(uplink.index))
        .await?
        .into_iter()
        .filter(|r| !is_link_local(&r.dst))
        .collect();

    for addr in netlink.addresses(Some(uplink.index), None).await? {
        if is_link_local(&addr.addr) {
            continue;
        }
        debug!("Moving {} from {from} to {to}", addr.addr);
        match netlink
            .address_add(&IfAddr::new(bridge.index, addr.addr))
            .await
        {
            Ok(()) | Err(NetlinkError::Exists(_)) => {}
            Err(e) => return Err(e),
        }
        netlink.address_del(&addr).await?;
    }

    for route in routes {
        let moved = Route {
            link_index: bridge.index,
            ..route
        };
        debug!("Moving route {route} to {to}");
        netlink.route_replace(&moved).await?;
    }
    Ok(())
}
