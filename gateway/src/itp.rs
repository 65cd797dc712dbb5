// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Policy routing of internal-traffic-policy=local service traffic: packets marked
//! by the `OVN-KUBE-ITP` chains look up a dedicated table that sends service CIDRs
//! to the management port.

use crate::GatewayError;
use config::consts::{ITP_MARK, ITP_ROUTE_TABLE, ITP_RULE_PRIORITY};
use config::{GatewayConfig, IpFamily};
use exec::Exec;
use interface_manager::{Netlink, Rule};
use routing::{RouteEntry, RouteError, RouteManager};
use tracing::{debug, info, warn};

/// The policy rule selecting the ITP table for `family`
#[must_use]
pub fn itp_rule(family: IpFamily) -> Rule {
    Rule {
        family,
        fwmark: Some(ITP_MARK),
        table: ITP_ROUTE_TABLE,
        priority: ITP_RULE_PRIORITY,
    }
}

/// The routes of the ITP table
#[must_use]
pub fn itp_routes(config: &GatewayConfig) -> Vec<RouteEntry> {
    let mut entries = Vec::new();
    for family in config.families() {
        let Some(gateway) = config.mgmt_port_gateway(family) else {
            continue;
        };
        for svc in config.service_cidrs_of(family) {
            entries.push(RouteEntry {
                gateway: Some(gateway),
                table: ITP_ROUTE_TABLE,
                ..RouteEntry::new(svc, config.mgmt_port_name.as_str())
            });
        }
    }
    entries
}

/// Install the ITP routes and rules and loosen reverse path filtering on the
/// management port.
pub async fn ensure_itp(
    config: &GatewayConfig,
    routes: &RouteManager,
    netlink: &dyn Netlink,
    exec: &dyn Exec,
) -> Result<(), GatewayError> {
    for entry in itp_routes(config) {
        match routes.add(entry).await {
            Ok(()) => {}
            // the management port shows up later; the reconciler keeps trying
            Err(RouteError::LinkNotFound(link, dst)) => {
                warn!("Route to {dst} postponed: no link {link} yet");
            }
            Err(e) => return Err(e.into()),
        }
    }
    for family in config.families() {
        let rule = itp_rule(family);
        if netlink.rules(family).await?.contains(&rule) {
            debug!("{family} ITP rule already present");
            continue;
        }
        netlink.rule_add(&rule).await?;
        info!(
            "Added {family} rule fwmark {ITP_MARK:#x} lookup {ITP_ROUTE_TABLE} prio {ITP_RULE_PRIORITY}"
        );
    }
    if config.ipv4() {
        let key = format!("net.ipv4.conf.{}.rp_filter", config.mgmt_port_name);
        exec::sysctl(exec, &key, "2").await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{GatewayConfigBuilder, GatewayMode};
    use exec::FakeExec;
    use interface_manager::FakeNetlink;
    use ipnet::IpNet;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn dual_stack() -> GatewayConfig {
        GatewayConfigBuilder::default()
            .mode(GatewayMode::Shared)
            .node_name("node1")
            .host_subnets(vec![
                "10.1.1.0/24".parse().unwrap(),
                "fd00:10:1:1::/64".parse().unwrap(),
            ])
            .service_cidrs(vec![
                "172.16.1.0/24".parse().unwrap(),
                "fd00:172:16:1::/112".parse().unwrap(),
            ])
            .build()
            .unwrap()
    }

    #[test]
    fn routes_via_subnet_gateway() {
        let routes = itp_routes(&dual_stack());
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].dst, "172.16.1.0/24".parse::<IpNet>().unwrap());
        assert_eq!(routes[0].gateway, Some("10.1.1.1".parse().unwrap()));
        assert_eq!(routes[0].link, "ovn-k8s-mp0");
        assert_eq!(routes[0].table, 7);
        assert_eq!(routes[1].gateway, Some("fd00:10:1:1::1".parse().unwrap()));
    }

    #[tokio::test]
    #[traced_test]
    async fn itp_is_idempotent() {
        let kernel = Arc::new(FakeNetlink::new());
        kernel.add_link("ovn-k8s-mp0", None);
        let routes = RouteManager::new(kernel.clone());
        let exec = FakeExec::loose();
        let cfg = dual_stack();

        ensure_itp(&cfg, &routes, kernel.as_ref(), &exec).await.unwrap();
        ensure_itp(&cfg, &routes, kernel.as_ref(), &exec).await.unwrap();

        assert_eq!(kernel.all_rules(), vec![itp_rule(IpFamily::V4), itp_rule(IpFamily::V6)]);
        assert_eq!(kernel.all_routes().len(), 2);
        assert!(kernel.all_routes().iter().all(|r| r.table == 7));
        assert!(exec.was_called("sysctl -w net.ipv4.conf.ovn-k8s-mp0.rp_filter=2"));
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_mgmt_port_is_not_fatal() {
        let kernel = Arc::new(FakeNetlink::new());
        let routes = RouteManager::new(kernel.clone());
        let exec = FakeExec::loose();
        ensure_itp(&dual_stack(), &routes, kernel.as_ref(), &exec)
            .await
            .unwrap();
        assert!(kernel.all_routes().is_empty());
        assert_eq!(routes.entries().await.len(), 2);
        assert!(logs_contain("postponed"));
    }
}
