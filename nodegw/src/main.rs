// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]

use args::{CmdArgs, InvalidCmdArguments, Parser};
use exec::{Backoff, SystemExec};
use gateway::{AnyGateway, BridgeLocks, GatewayDeps, GatewayError};
use hardware::DevlinkSriov;
use interface_manager::{Netlink, NetlinkError, RtNetlink};
use k8s_intf::{KubeNodeStore, NodeStore, StoreError};
use k8s_less::FileNodeStore;
use nix::unistd::gethostname;
use routing::RouteManager;
use rules::{IptablesCli, NftCli};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracectl::{get_trace_ctl, trace_target};
use tracing::{error, info};

trace_target!("nodegw", LevelFilter::INFO, &[]);

#[derive(Debug, thiserror::Error)]
enum AgentError {
    #[error("Failed to get hostname: {0}")]
    Hostname(String),
    #[error(transparent)]
    Args(#[from] InvalidCmdArguments),
    #[error("Node store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("Netlink unavailable: {0}")]
    Netlink(#[from] NetlinkError),
    #[error("Failed to set signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

fn init_name(args: &CmdArgs) -> Result<String, AgentError> {
    if let Some(name) = args.node_name() {
        return Ok(name.to_string());
    }
    let hostname =
        gethostname().map_err(|errno| AgentError::Hostname(errno.desc().to_string()))?;
    hostname
        .to_str()
        .map(ToString::to_string)
        .ok_or_else(|| AgentError::Hostname(format!("{} is not UTF-8", hostname.display())))
}

fn process_tracing_cmds(args: &CmdArgs) {
    let tctl = get_trace_ctl();
    if let Some(tracing) = args.tracing()
        && let Err(e) = tctl.setup_from_string(tracing)
    {
        eprintln!("Invalid tracing configuration: {e}");
        std::process::exit(1);
    }
    if args.show_tracing_targets() {
        println!("{}", tctl.as_string());
        std::process::exit(0);
    }
}

async fn node_store(args: &CmdArgs) -> Result<Arc<dyn NodeStore>, AgentError> {
    match args.k8s_less_dir() {
        Some(dir) => {
            info!("Running k8s-less with node records in {}", dir.display());
            Ok(Arc::new(FileNodeStore::new(dir).await?))
        }
        None => Ok(Arc::new(KubeNodeStore::try_default().await?)),
    }
}

fn netlink(args: &CmdArgs) -> Result<Arc<dyn Netlink>, AgentError> {
    match args.netns() {
        Some(path) => {
            info!("Managing kernel state in network namespace {}", path.display());
            Ok(Arc::new(RtNetlink::in_netns(path)?))
        }
        None => Ok(Arc::new(RtNetlink::new()?)),
    }
}

/// Bring the gateway up and keep it running until `stop` is cancelled.
async fn run(
    args: &CmdArgs,
    stop: &CancellationToken,
    tracker: &TaskTracker,
) -> Result<(), AgentError> {
    let name = init_name(args)?;
    info!(" ━━━━━━ Node gateway for '{name}' started ━━━━━━");
    let config = args.gateway_config(&name)?;

    let exec = Arc::new(SystemExec::new(config.intervals.command_timeout));
    let netlink = netlink(args)?;
    let routes = Arc::new(RouteManager::new(netlink.clone()));
    let deps = GatewayDeps {
        exec: exec.clone(),
        netlink,
        nodes: node_store(args).await?,
        nftables: Arc::new(NftCli::new(exec.clone())),
        iptables: Arc::new(IptablesCli::new(exec.clone())),
        sriov: Arc::new(DevlinkSriov::new(exec)),
        routes: routes.clone(),
        backoff: Backoff::default(),
        bridge_locks: BridgeLocks::new(),
    };

    let interval = config.intervals.route_sync;
    let token = stop.clone();
    tracker.spawn(async move { routes.run(token, interval).await });

    let mut gateway = AnyGateway::new(config, deps)?;
    gateway.bring_up(stop, tracker).await?;
    info!("{} gateway is {}", gateway.mode(), gateway.state());
    stop.cancelled().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = CmdArgs::parse();
    process_tracing_cmds(&args);

    let stop = CancellationToken::new();
    let tracker = TaskTracker::new();
    let ctrlc_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || ctrlc_stop.cancel()) {
        error!("{}", AgentError::from(e));
        std::process::exit(1);
    }

    let result = run(&args, &stop, &tracker).await;
    if let Err(e) = &result {
        error!("Node gateway failed: {e}");
    }
    info!("Shutting down node gateway");
    stop.cancel();
    tracker.close();
    tracker.wait().await;
    if result.is_err() {
        std::process::exit(1);
    }
}
