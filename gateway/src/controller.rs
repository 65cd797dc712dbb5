// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{BridgeGateway, DpuHostGateway, GatewayDeps, GatewayError};
use config::{GatewayConfig, GatewayMode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// Lifecycle of a gateway: `init_func`, `init` and `start` each move it one step
/// forward and fail in any other state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum GatewayState {
    Unconfigured,
    /// Discovery done, nothing published yet
    Initializing,
    Ready,
    Running,
}

impl GatewayState {
    pub(crate) fn require(
        self,
        op: &'static str,
        wanted: GatewayState,
    ) -> Result<(), GatewayError> {
        if self == wanted {
            Ok(())
        } else {
            Err(GatewayError::State { op, state: self })
        }
    }
}

/// The gateway flavour selected by the configured mode.
pub enum AnyGateway {
    Shared(BridgeGateway),
    Local(BridgeGateway),
    Dpu(BridgeGateway),
    DpuHost(DpuHostGateway),
}

impl AnyGateway {
    /// Validate `config` and build the gateway of its mode.
    pub fn new(config: GatewayConfig, deps: GatewayDeps) -> Result<Self, GatewayError> {
        config.validate()?;
        let mode = config.mode;
        let config = Arc::new(config);
        info!("Creating {mode} gateway for node {}", config.node_name);
        Ok(match mode {
            GatewayMode::Shared => AnyGateway::Shared(BridgeGateway::new(config, deps)),
            GatewayMode::Local => AnyGateway::Local(BridgeGateway::new(config, deps)),
            GatewayMode::Dpu => AnyGateway::Dpu(BridgeGateway::new(config, deps)),
            GatewayMode::DpuHost => AnyGateway::DpuHost(DpuHostGateway::new(config, deps)),
        })
    }

    #[must_use]
    pub fn mode(&self) -> GatewayMode {
        match self {
            AnyGateway::Shared(_) => GatewayMode::Shared,
            AnyGateway::Local(_) => GatewayMode::Local,
            AnyGateway::Dpu(_) => GatewayMode::Dpu,
            AnyGateway::DpuHost(_) => GatewayMode::DpuHost,
        }
    }

    #[must_use]
    pub fn state(&self) -> GatewayState {
        match self {
            AnyGateway::Shared(gw) | AnyGateway::Local(gw) | AnyGateway::Dpu(gw) => gw.state(),
            AnyGateway::DpuHost(gw) => gw.state(),
        }
    }

    /// The bridge gateway behind any mode but DPU-host
    #[must_use]
    pub fn bridged(&self) -> Option<&BridgeGateway> {
        match self {
            AnyGateway::Shared(gw) | AnyGateway::Local(gw) | AnyGateway::Dpu(gw) => Some(gw),
            AnyGateway::DpuHost(_) => None,
        }
    }

    pub async fn init_func(&mut self) -> Result<(), GatewayError> {
        match self {
            AnyGateway::Shared(gw) | AnyGateway::Local(gw) | AnyGateway::Dpu(gw) => {
                gw.init_func().await
            }
            AnyGateway::DpuHost(gw) => gw.init_func().await,
        }
    }

    pub async fn init(&mut self) -> Result<(), GatewayError> {
        match self {
            AnyGateway::Shared(gw) | AnyGateway::Local(gw) | AnyGateway::Dpu(gw) => {
                gw.init().await
            }
            AnyGateway::DpuHost(gw) => gw.init().await,
        }
    }

    pub fn start(
        &mut self,
        stop: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<(), GatewayError> {
        match self {
            AnyGateway::Shared(gw) | AnyGateway::Local(gw) | AnyGateway::Dpu(gw) => {
                gw.start(stop, tracker)
            }
            AnyGateway::DpuHost(gw) => gw.start(stop, tracker),
        }
    }

    /// `init_func`, `init` and `start` in a row
    pub async fn bring_up(
        &mut self,
        stop: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<(), GatewayError> {
        self.init_func().await?;
        self.init().await?;
        self.start(stop, tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_requirements() {
        assert!(GatewayState::Ready.require("start", GatewayState::Ready).is_ok());
        let err = GatewayState::Unconfigured
            .require("start", GatewayState::Ready)
            .unwrap_err();
        assert_eq!(err.to_string(), "Can't start a gateway in state Unconfigured");
    }
}
