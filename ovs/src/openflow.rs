// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{BridgeInfo, FlowInputs, Ovs, OvsError, build_flows};
use parking_lot::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Owns the flow table of the gateway bridge.
pub struct OpenFlowManager {
    ovs: Ovs,
    bridge: String,
    patch_port: String,
    uplink: Option<String>,
    inputs: Mutex<FlowInputs>,
}

impl OpenFlowManager {
    #[must_use]
    pub fn new(ovs: Ovs, info: &BridgeInfo, inputs: FlowInputs) -> Self {
        Self {
            ovs,
            bridge: info.bridge.clone(),
            patch_port: info.patch_port.clone(),
            uplink: info.uplink.clone(),
            inputs: Mutex::new(inputs),
        }
    }

    #[must_use]
    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    /// The flows the bridge should currently carry
    #[must_use]
    pub fn flows(&self) -> Vec<String> {
        build_flows(&self.inputs.lock())
    }

    /// Install the complete flow table in one bundle.
    pub async fn sync_flows(&self) -> Result<(), OvsError> {
        let flows = self.flows();
        self.ovs.replace_flows(&self.bridge, &flows).await
    }

    /// Re-read the ofports the flows depend on and re-sync the flows if any of them
    /// moved.  Returns whether a re-sync happened.  The new ofports are only kept once
    /// the flows carrying them are installed, so a failed re-sync is retried.
    pub async fn check_ports(&self) -> Result<bool, OvsError> {
        let uplink_ofport = match &self.uplink {
            Some(uplink) => {
                let ofport = self.ovs.current_ofport(uplink).await?;
                if ofport.is_none() {
                    warn!("Uplink {uplink} has no ofport");
                }
                ofport
            }
            None => None,
        };
        let patch_ofport = self.ovs.current_ofport(&self.patch_port).await?;

        let mut wanted = self.inputs.lock().clone();
        if let Some(ofport) = uplink_ofport
            && wanted.uplink_ofport != Some(ofport)
        {
            info!("Uplink ofport changed to {ofport}");
            wanted.uplink_ofport = Some(ofport);
        }
        match patch_ofport {
            Some(ofport) if ofport != wanted.patch_ofport => {
                info!("Patch port ofport changed to {ofport}");
                wanted.patch_ofport = ofport;
            }
            Some(_) => {}
            None => warn!("Patch port {} has no ofport", self.patch_port),
        }
        if *self.inputs.lock() == wanted {
            return Ok(false);
        }
        self.ovs
            .replace_flows(&self.bridge, &build_flows(&wanted))
            .await?;
        *self.inputs.lock() = wanted;
        Ok(true)
    }

    /// Check the ports every `interval` until `stop` is cancelled.
    pub async fn run(&self, stop: CancellationToken, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = stop.cancelled() => {
                    debug!("Stopping flow checks on {}", self.bridge);
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_ports().await {
                        error!("Failed to check the ports of {}: {e}", self.bridge);
                    }
                }
            }
        }
    }
}
