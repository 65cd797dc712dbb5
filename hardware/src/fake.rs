// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{HardwareError, PortFlavour, Sriov};
use async_trait::async_trait;
use interface_manager::Mac;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Representors with fixed properties.  Unknown netdevs have no devlink port.
#[derive(Default)]
pub struct FakeSriov {
    ports: Mutex<HashMap<String, (PortFlavour, Option<Mac>)>>,
}

impl FakeSriov {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_port(&self, netdev: &str, flavour: PortFlavour, peer: Option<Mac>) {
        self.ports
            .lock()
            .insert(netdev.to_string(), (flavour, peer));
    }
}

#[async_trait]
impl Sriov for FakeSriov {
    async fn port_flavour(&self, netdev: &str) -> Result<PortFlavour, HardwareError> {
        self.ports
            .lock()
            .get(netdev)
            .map(|(flavour, _)| flavour.clone())
            .ok_or_else(|| HardwareError::NoPort(netdev.to_string()))
    }

    async fn peer_mac(&self, netdev: &str) -> Result<Mac, HardwareError> {
        match self.ports.lock().get(netdev) {
            None => Err(HardwareError::NoPort(netdev.to_string())),
            Some((_, None)) => Err(HardwareError::NoPeerMac(netdev.to_string())),
            Some((_, Some(mac))) => Ok(*mac),
        }
    }
}
