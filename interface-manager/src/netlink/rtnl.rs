// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! [`Netlink`] implementation on top of `rtnetlink`.

use super::{IfAddr, Link, Netlink, NetlinkError, Route, RouteFilter, Rule};
use crate::Mac;
use crate::netns;
use async_trait::async_trait;
use config::IpFamily;
use futures::TryStreamExt;
use ipnet::IpNet;
use nix::errno::Errno;
use rtnetlink::packet_route::AddressFamily;
use rtnetlink::packet_route::address::{AddressAttribute, AddressMessage};
use rtnetlink::packet_route::link::{LinkAttribute, LinkFlags, LinkMessage};
use rtnetlink::packet_route::route::{
    RouteAddress, RouteAttribute, RouteMessage, RouteMetric, RouteType,
};
use rtnetlink::packet_route::rule::{RuleAction, RuleAttribute, RuleMessage};
use rtnetlink::{Handle, IpVersion, LinkUnspec, RouteMessageBuilder, new_connection};
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use tracing::{debug, trace};

/// Kernel access over an rtnetlink socket.
#[derive(Clone)]
pub struct RtNetlink {
    handle: Handle,
}

impl RtNetlink {
    /// Connect in the current network namespace.  Must be called within a tokio runtime.
    pub fn new() -> Result<Self, NetlinkError> {
        let (connection, handle, _) = new_connection()?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    /// Connect inside the network namespace at `path` (e.g. `/var/run/netns/foo`).
    /// The socket stays bound to that namespace for its whole lifetime, so the calling
    /// thread only visits the namespace while the socket is created.
    pub fn in_netns(path: &Path) -> Result<Self, NetlinkError> {
        let (connection, handle, _) = netns::in_netns(path, new_connection)??;
        tokio::spawn(connection);
        debug!("Opened netlink socket in {}", path.display());
        Ok(Self { handle })
    }
}

fn errno_of(e: &rtnetlink::Error) -> Option<i32> {
    match e {
        rtnetlink::Error::NetlinkError(msg) => msg.code.map(|code| -code.get()),
        _ => None,
    }
}

fn classify(e: rtnetlink::Error, what: impl Display) -> NetlinkError {
    match errno_of(&e) {
        Some(code) if code == Errno::EEXIST as i32 => NetlinkError::Exists(what.to_string()),
        Some(code)
            if code == Errno::ENOENT as i32
                || code == Errno::ESRCH as i32
                || code == Errno::ENODEV as i32 =>
        {
            NetlinkError::NotFound(what.to_string())
        }
        _ => NetlinkError::Rtnetlink(e),
    }
}

fn address_family(family: IpFamily) -> AddressFamily {
    match family {
        IpFamily::V4 => AddressFamily::Inet,
        IpFamily::V6 => AddressFamily::Inet6,
    }
}

fn ip_family(family: AddressFamily) -> Option<IpFamily> {
    match family {
        AddressFamily::Inet => Some(IpFamily::V4),
        AddressFamily::Inet6 => Some(IpFamily::V6),
        _ => None,
    }
}

fn route_address(addr: IpAddr) -> RouteAddress {
    match addr {
        IpAddr::V4(v4) => RouteAddress::Inet(v4),
        IpAddr::V6(v6) => RouteAddress::Inet6(v6),
    }
}

fn route_ip(addr: &RouteAddress) -> Option<IpAddr> {
    match addr {
        RouteAddress::Inet(v4) => Some(IpAddr::V4(*v4)),
        RouteAddress::Inet6(v6) => Some(IpAddr::V6(*v6)),
        _ => None,
    }
}

fn parse_link(msg: &LinkMessage) -> Link {
    let mut link = Link {
        index: msg.header.index,
        name: String::new(),
        mac: None,
        mtu: 0,
        up: msg.header.flags.contains(LinkFlags::Up),
    };
    for attr in &msg.attributes {
        match attr {
            LinkAttribute::IfName(name) => link.name.clone_from(name),
            LinkAttribute::Address(bytes) => link.mac = Mac::try_from(bytes.as_slice()).ok(),
            LinkAttribute::Mtu(mtu) => link.mtu = *mtu,
            _ => {}
        }
    }
    link
}

fn parse_address(msg: &AddressMessage) -> Option<IfAddr> {
    // IFA_LOCAL is the local address on point-to-point links, IFA_ADDRESS the peer
    let mut local = None;
    let mut address = None;
    for attr in &msg.attributes {
        match attr {
            AddressAttribute::Local(addr) => local = Some(*addr),
            AddressAttribute::Address(addr) => address = Some(*addr),
            _ => {}
        }
    }
    let ip = local.or(address)?;
    let addr = IpNet::new(ip, msg.header.prefix_len).ok()?;
    Some(IfAddr::new(msg.header.index, addr))
}

fn parse_route(msg: &RouteMessage) -> Option<Route> {
    if msg.header.kind != RouteType::Unicast {
        return None;
    }
    let family = ip_family(msg.header.address_family)?;
    let mut dst = None;
    let mut link_index = None;
    let mut gateway = None;
    let mut source = None;
    let mut mtu = None;
    let mut table = u32::from(msg.header.table);
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Destination(addr) => dst = route_ip(addr),
            RouteAttribute::Oif(oif) => link_index = Some(*oif),
            RouteAttribute::Gateway(addr) => gateway = route_ip(addr),
            RouteAttribute::PrefSource(addr) => source = route_ip(addr),
            RouteAttribute::Table(id) => table = *id,
            RouteAttribute::Metrics(metrics) => {
                for metric in metrics {
                    if let RouteMetric::Mtu(value) = metric {
                        mtu = Some(*value);
                    }
                }
            }
            _ => {}
        }
    }
    let dst = dst.unwrap_or(match family {
        IpFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    });
    let Some(link_index) = link_index else {
        trace!("Skipping route to {dst} without output interface");
        return None;
    };
    Some(Route {
        dst: IpNet::new(dst, msg.header.destination_prefix_length).ok()?,
        link_index,
        gateway,
        source,
        mtu,
        table,
    })
}

fn route_message(route: &Route) -> Result<RouteMessage, NetlinkError> {
    route.check_families()?;
    let mut builder = RouteMessageBuilder::<IpAddr>::new()
        .table_id(route.table)
        .output_interface(route.link_index)
        .destination_prefix(route.dst.addr(), route.dst.prefix_len())
        .map_err(|e| NetlinkError::Invalid(format!("{route}: {e:?}")))?;
    if let Some(gateway) = route.gateway {
        builder = builder
            .gateway(gateway)
            .map_err(|e| NetlinkError::Invalid(format!("{route}: {e:?}")))?;
    }
    let mut message = builder.build();
    if let Some(source) = route.source {
        message
            .attributes
            .push(RouteAttribute::PrefSource(route_address(source)));
    }
    if let Some(mtu) = route.mtu {
        message
            .attributes
            .push(RouteAttribute::Metrics(vec![RouteMetric::Mtu(mtu)]));
    }
    Ok(message)
}

fn parse_rule(msg: &RuleMessage) -> Option<Rule> {
    if msg.header.action != RuleAction::ToTable {
        return None;
    }
    let family = ip_family(msg.header.family)?;
    let mut rule = Rule {
        family,
        fwmark: None,
        table: u32::from(msg.header.table),
        priority: 0,
    };
    for attr in &msg.attributes {
        match attr {
            RuleAttribute::Table(table) => rule.table = *table,
            RuleAttribute::FwMark(mark) => rule.fwmark = Some(*mark),
            RuleAttribute::Priority(priority) => rule.priority = *priority,
            _ => {}
        }
    }
    Some(rule)
}

impl RtNetlink {
    async fn address_messages(
        &self,
        link_index: Option<u32>,
    ) -> Result<Vec<AddressMessage>, NetlinkError> {
        let mut request = self.handle.address().get();
        if let Some(index) = link_index {
            request = request.set_link_index_filter(index);
        }
        let mut stream = request.execute();
        let mut messages = Vec::new();
        while let Some(message) = stream.try_next().await? {
            messages.push(message);
        }
        Ok(messages)
    }
}

#[async_trait]
impl Netlink for RtNetlink {
    async fn links(&self) -> Result<Vec<Link>, NetlinkError> {
        let mut stream = self.handle.link().get().execute();
        let mut links = Vec::new();
        while let Some(message) = stream.try_next().await? {
            links.push(parse_link(&message));
        }
        Ok(links)
    }

    async fn link_by_name(&self, name: &str) -> Result<Link, NetlinkError> {
        let found = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute()
            .try_next()
            .await;
        match found {
            Ok(Some(message)) => Ok(parse_link(&message)),
            Ok(None) => Err(NetlinkError::LinkNotFound(name.to_string())),
            Err(e) => match classify(e, name) {
                NetlinkError::NotFound(_) => Err(NetlinkError::LinkNotFound(name.to_string())),
                other => Err(other),
            },
        }
    }

    async fn link_by_index(&self, index: u32) -> Result<Link, NetlinkError> {
        let what = format!("#{index}");
        let found = self
            .handle
            .link()
            .get()
            .match_index(index)
            .execute()
            .try_next()
            .await;
        match found {
            Ok(Some(message)) => Ok(parse_link(&message)),
            Ok(None) => Err(NetlinkError::LinkNotFound(what)),
            Err(e) => match classify(e, &what) {
                NetlinkError::NotFound(_) => Err(NetlinkError::LinkNotFound(what)),
                other => Err(other),
            },
        }
    }

    async fn link_set_up(&self, index: u32) -> Result<(), NetlinkError> {
        debug!("Setting link #{index} up");
        self.handle
            .link()
            .set(LinkUnspec::new_with_index(index).up().build())
            .execute()
            .await
            .map_err(|e| classify(e, format!("link #{index}")))
    }

    async fn link_set_mac(&self, index: u32, mac: Mac) -> Result<(), NetlinkError> {
        debug!("Setting MAC of link #{index} to {mac}");
        self.handle
            .link()
            .set(
                LinkUnspec::new_with_index(index)
                    .address(mac.0.to_vec())
                    .build(),
            )
            .execute()
            .await
            .map_err(|e| classify(e, format!("link #{index}")))
    }

    async fn addresses(
        &self,
        link_index: Option<u32>,
        family: Option<IpFamily>,
    ) -> Result<Vec<IfAddr>, NetlinkError> {
        Ok(self
            .address_messages(link_index)
            .await?
            .iter()
            .filter_map(parse_address)
            .filter(|a| link_index.is_none_or(|i| i == a.link_index))
            .filter(|a| family.is_none_or(|f| f == a.family()))
            .collect())
    }

    async fn address_add(&self, addr: &IfAddr) -> Result<(), NetlinkError> {
        debug!("Adding {} to link #{}", addr.addr, addr.link_index);
        self.handle
            .address()
            .add(addr.link_index, addr.addr.addr(), addr.addr.prefix_len())
            .execute()
            .await
            .map_err(|e| classify(e, addr.addr))
    }

    async fn address_del(&self, addr: &IfAddr) -> Result<(), NetlinkError> {
        debug!("Removing {} from link #{}", addr.addr, addr.link_index);
        let message = self
            .address_messages(Some(addr.link_index))
            .await?
            .into_iter()
            .find(|m| parse_address(m).as_ref() == Some(addr))
            .ok_or_else(|| NetlinkError::NotFound(addr.addr.to_string()))?;
        self.handle
            .address()
            .del(message)
            .execute()
            .await
            .map_err(|e| classify(e, addr.addr))
    }

    async fn routes(&self, filter: &RouteFilter) -> Result<Vec<Route>, NetlinkError> {
        let families = match filter.family {
            Some(family) => vec![family],
            None => vec![IpFamily::V4, IpFamily::V6],
        };
        let mut routes = Vec::new();
        for family in families {
            let mut message = RouteMessageBuilder::<IpAddr>::new().build();
            message.header.address_family = address_family(family);
            let mut stream = self.handle.route().get(message).execute();
            while let Some(message) = stream.try_next().await? {
                if let Some(route) = parse_route(&message)
                    && filter.matches(&route)
                {
                    routes.push(route);
                }
            }
        }
        Ok(routes)
    }

    async fn route_replace(&self, route: &Route) -> Result<(), NetlinkError> {
        debug!("Replacing route {route}");
        let message = route_message(route)?;
        self.handle
            .route()
            .add(message)
            .replace()
            .execute()
            .await
            .map_err(|e| classify(e, route))
    }

    async fn route_del(&self, route: &Route) -> Result<(), NetlinkError> {
        debug!("Deleting route {route}");
        let message = route_message(route)?;
        self.handle
            .route()
            .del(message)
            .execute()
            .await
            .map_err(|e| classify(e, route))
    }

    async fn rules(&self, family: IpFamily) -> Result<Vec<Rule>, NetlinkError> {
        let version = match family {
            IpFamily::V4 => IpVersion::V4,
            IpFamily::V6 => IpVersion::V6,
        };
        let mut stream = self.handle.rule().get(version).execute();
        let mut rules = Vec::new();
        while let Some(message) = stream.try_next().await? {
            rules.extend(parse_rule(&message));
        }
        Ok(rules)
    }

    async fn rule_add(&self, rule: &Rule) -> Result<(), NetlinkError> {
        debug!(
            "Adding {} rule fwmark {:?} lookup {} prio {}",
            rule.family, rule.fwmark, rule.table, rule.priority
        );
        let mut request = self
            .handle
            .rule()
            .add()
            .action(RuleAction::ToTable)
            .table_id(rule.table)
            .priority(rule.priority);
        request.message_mut().header.family = address_family(rule.family);
        if let Some(mark) = rule.fwmark {
            request
                .message_mut()
                .attributes
                .push(RuleAttribute::FwMark(mark));
        }
        request
            .execute()
            .await
            .map_err(|e| classify(e, format!("rule prio {}", rule.priority)))
    }
}
