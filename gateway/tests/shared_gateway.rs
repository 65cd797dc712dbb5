// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

mod common;

use common::{CHASSIS, FakeNode, VSCTL, expect_discovery_tail};
use config::consts::annotations::{
    CHASSIS_ID, GATEWAY_MTU_SUPPORT, L3_GATEWAY_CONFIG, MASQUERADE_SUBNET,
};
use config::{GatewayConfig, GatewayConfigBuilder, GatewayMode, IpFamily};
use exec::FakeExec;
use interface_manager::{Mac, Route};
use ipnet::IpNet;
use k8s_intf::NodeRecord;
use k8s_intf::annotations::L3GatewayConfig;
use nodegw_gateway::{AnyGateway, GatewayError, GatewayState, ResolveError};
use pretty_assertions::assert_eq;
use rules::Table;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_test::traced_test;

fn shared_config() -> GatewayConfig {
    let mut cfg = GatewayConfigBuilder::default()
        .mode(GatewayMode::Shared)
        .node_name("node1")
        .host_subnets(vec!["10.1.1.0/24".parse().unwrap()])
        .interface("eth0")
        .service_cidrs(vec!["172.16.1.0/24".parse().unwrap()])
        .build()
        .unwrap();
    cfg.features.node_port = true;
    cfg.features.set_encap_ip = true;
    cfg
}

fn stale_node() -> NodeRecord {
    let mut node = NodeRecord {
        internal_ips: vec!["192.168.1.10".parse().unwrap()],
        ..NodeRecord::new("node1")
    };
    node.annotations.insert(
        MASQUERADE_SUBNET.to_string(),
        r#"{"ipv4":"170.254.0.0/16","ipv6":"fa69::/112"}"#.to_string(),
    );
    node
}

/// eth0 with an address and a default route, a leftover breth0 carrying state from an
/// older masquerade subnet, and the management port.
fn plumb(node: &FakeNode) {
    let mac: Mac = "aa:bb:cc:dd:ee:ff".parse().unwrap();
    let eth0 = node.kernel.add_link("eth0", Some(mac));
    node.kernel
        .add_address("eth0", "192.168.1.10/24".parse().unwrap());
    let mut default = Route::new("0.0.0.0/0".parse().unwrap(), eth0);
    default.gateway = Some("192.168.1.1".parse().unwrap());
    node.kernel.add_route(default);

    let breth0 = node.kernel.add_link("breth0", None);
    node.kernel
        .add_address("breth0", "170.254.0.2/32".parse().unwrap());
    node.kernel
        .add_route(Route::new("170.254.0.1/32".parse().unwrap(), breth0));

    node.kernel.add_link("ovn-k8s-mp0", None);
}

fn expect_shared_init(exec: &FakeExec) {
    // resolver
    exec.expect_err(&format!("{VSCTL} port-to-br eth0"), "no port named eth0");
    // bridge creation
    exec.expect_err(&format!("{VSCTL} port-to-br eth0"), "no port named eth0");
    exec.expect_err(&format!("{VSCTL} br-exists eth0"), "");
    exec.expect(
        &format!(
            "{VSCTL} -- --may-exist add-br breth0 -- br-set-external-id breth0 bridge-id breth0 \
             -- br-set-external-id breth0 bridge-uplink eth0 -- set bridge breth0 \
             fail-mode=standalone other_config:hwaddr=aa:bb:cc:dd:ee:ff \
             -- --may-exist add-port breth0 eth0 -- set port eth0 other-config:transient=true"
        ),
        "",
    );
    expect_discovery_tail(exec, "breth0", "aa:bb:cc:dd:ee:ff", Some("eth0"), true);
    // node IP sync
    exec.expect_err(
        &format!("{VSCTL} get Open_vSwitch . external_ids:ovn-encap-ip"),
        "no key \"ovn-encap-ip\" in Open_vSwitch record \".\" column external_ids",
    );
    exec.expect(
        &format!("{VSCTL} set Open_vSwitch . external_ids:ovn-encap-ip=192.168.1.10"),
        "",
    );
    exec.expect("ovn-appctl --timeout=5 -t ovn-controller exit --restart", "");
    // ITP
    exec.expect("sysctl -w net.ipv4.conf.ovn-k8s-mp0.rp_filter=2", "");
    // flows
    exec.expect("ovs-ofctl -O OpenFlow13 --bundle replace-flows breth0 -", "");
}

fn net(s: &str) -> IpNet {
    s.parse().unwrap()
}

#[tokio::test]
#[traced_test]
async fn test_shared_gateway_end_to_end() {
    let node = FakeNode::new(FakeExec::strict(), stale_node());
    plumb(&node);
    expect_shared_init(&node.exec);

    let mut gw = AnyGateway::new(shared_config(), node.deps()).unwrap();
    assert_eq!(gw.mode(), GatewayMode::Shared);
    gw.init_func().await.unwrap();
    assert_eq!(gw.state(), GatewayState::Initializing);
    gw.init().await.unwrap();
    assert_eq!(gw.state(), GatewayState::Ready);
    assert!(node.exec.called_matches_expected(), "{:?}", node.exec.commands());

    // the uplink's configuration moved to the bridge, stale masquerade state is gone
    assert_eq!(
        node.kernel.addresses_of("breth0"),
        vec![net("192.168.1.10/24"), net("169.254.169.2/29")]
    );
    assert!(node.kernel.addresses_of("eth0").is_empty());
    let breth0 = node.kernel.index_of("breth0");
    let routes = node.kernel.all_routes();
    assert!(!routes.iter().any(|r| r.dst == net("170.254.0.1/32")));
    let masquerade = routes
        .iter()
        .find(|r| r.dst == net("169.254.169.1/32"))
        .expect("masquerade route");
    assert_eq!(masquerade.link_index, breth0);
    assert_eq!(masquerade.source, Some("192.168.1.10".parse().unwrap()));
    let default = routes
        .iter()
        .find(|r| r.dst == net("0.0.0.0/0"))
        .expect("default route");
    assert_eq!(default.link_index, breth0);

    // ITP policy routing
    let itp = routes
        .iter()
        .find(|r| r.table == 7)
        .expect("ITP route");
    assert_eq!(itp.dst, net("172.16.1.0/24"));
    assert_eq!(itp.gateway, Some("10.1.1.1".parse().unwrap()));
    assert_eq!(itp.link_index, node.kernel.index_of("ovn-k8s-mp0"));
    assert_eq!(node.kernel.all_rules().len(), 1);
    assert_eq!(node.kernel.all_rules()[0].fwmark, Some(0x0017_45ec));

    // packet filter skeleton
    let nat = node.ipt.table(IpFamily::V4, Table::Nat);
    assert_eq!(
        nat["PREROUTING"],
        vec![
            "-j OVN-KUBE-ETP".to_string(),
            "-j OVN-KUBE-EXTERNALIP".to_string(),
            "-j OVN-KUBE-NODEPORT".to_string()
        ]
    );
    assert_eq!(
        nat["OUTPUT"],
        vec![
            "-j OVN-KUBE-EXTERNALIP".to_string(),
            "-j OVN-KUBE-NODEPORT".to_string(),
            "-j OVN-KUBE-ITP".to_string()
        ]
    );
    assert!(nat["OVN-KUBE-NODEPORT"].is_empty());
    assert!(!nat.contains_key("POSTROUTING"));
    let mangle = node.ipt.table(IpFamily::V4, Table::Mangle);
    assert_eq!(mangle["OUTPUT"], vec!["-j OVN-KUBE-ITP".to_string()]);
    let nft = node.nft.dump();
    assert_eq!(nft[0], "add table inet ovn-kubernetes");
    assert!(
        nft.iter()
            .any(|l| l.starts_with("add chain inet ovn-kubernetes mgmtport-snat"))
    );
    assert!(nft.iter().any(|l| l.ends_with("counter snat ip to 10.1.1.2")));

    // annotations
    assert_eq!(
        node.annotation(MASQUERADE_SUBNET).as_deref(),
        Some(r#"{"ipv4":"169.254.169.0/29"}"#)
    );
    assert_eq!(node.annotation(GATEWAY_MTU_SUPPORT).as_deref(), Some("false"));
    assert_eq!(node.annotation(CHASSIS_ID).as_deref(), Some(CHASSIS));
    let l3 = L3GatewayConfig::from_annotation(&node.annotation(L3_GATEWAY_CONFIG).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(
        l3,
        L3GatewayConfig {
            mode: GatewayMode::Shared,
            interface_id: "breth0_node1".to_string(),
            mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
            ip_addresses: vec![net("192.168.1.10/24")],
            next_hops: vec!["192.168.1.1".parse::<IpAddr>().unwrap()],
            chassis_id: Some(CHASSIS.to_string()),
            vlan_id: None,
            node_port_enable: Some("true".to_string()),
        }
    );

    let bridged = gw.bridged().unwrap();
    assert_eq!(bridged.bridge_info().unwrap().patch_ofport, 5);
    let flows = bridged.openflow_manager().unwrap().flows();
    let installed = node
        .exec
        .calls()
        .into_iter()
        .find(|c| c.cmd.contains("replace-flows"))
        .and_then(|c| c.stdin)
        .unwrap();
    assert_eq!(installed.lines().count(), flows.len());

    // the background tasks follow the stop signal
    let stop = CancellationToken::new();
    let tracker = TaskTracker::new();
    gw.start(&stop, &tracker).unwrap();
    assert_eq!(gw.state(), GatewayState::Running);
    stop.cancel();
    tracker.close();
    tracker.wait().await;
}

#[tokio::test]
#[traced_test]
async fn test_lifecycle_out_of_order() {
    let node = FakeNode::new(FakeExec::loose(), NodeRecord::new("node1"));
    let mut gw = AnyGateway::new(shared_config(), node.deps()).unwrap();
    assert!(matches!(
        gw.init().await,
        Err(GatewayError::State {
            op: "init",
            state: GatewayState::Unconfigured
        })
    ));
    let stop = CancellationToken::new();
    assert!(matches!(
        gw.start(&stop, &TaskTracker::new()),
        Err(GatewayError::State { op: "start", .. })
    ));
    assert_eq!(gw.state(), GatewayState::Unconfigured);
}

#[tokio::test]
#[traced_test]
async fn test_failed_init_func_can_be_retried() {
    let node = FakeNode::new(FakeExec::loose(), NodeRecord::new("node1"));
    let cfg = GatewayConfig {
        interface: None,
        ..shared_config()
    };
    let mut gw = AnyGateway::new(cfg, node.deps()).unwrap();
    assert!(matches!(
        gw.init_func().await,
        Err(GatewayError::Resolve(ResolveError::NoGatewayInterface))
    ));
    assert_eq!(gw.state(), GatewayState::Unconfigured);
    assert!(gw.init_func().await.is_err());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let node = FakeNode::new(FakeExec::loose(), NodeRecord::new("node1"));
    let cfg = GatewayConfig {
        vlan_id: Some(5000),
        ..shared_config()
    };
    assert!(matches!(
        AnyGateway::new(cfg, node.deps()),
        Err(GatewayError::Config(_))
    ));
}
