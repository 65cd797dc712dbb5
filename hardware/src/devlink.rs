// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use async_trait::async_trait;
use exec::{Cmd, Exec, ExecError};
use interface_manager::Mac;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("Failed to parse devlink output for {0}: {1}")]
    Parse(String, serde_json::Error),
    #[error("No devlink port for netdev {0}")]
    NoPort(String),
    #[error("Port {0} has no function hardware address")]
    NoPeerMac(String),
    #[error("Invalid hardware address on {0}: {1}")]
    BadMac(String, String),
}

/// Devlink port flavours relevant to the gateway.
#[derive(Clone, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PortFlavour {
    /// Uplink representor
    Physical,
    /// Representor of a PCI physical function, i.e. the host
    #[strum(serialize = "pcipf")]
    PciPf,
    /// Representor of a PCI virtual function
    #[strum(serialize = "pcivf")]
    PciVf,
    #[strum(default)]
    Other(String),
}

#[async_trait]
pub trait Sriov: Send + Sync {
    async fn port_flavour(&self, netdev: &str) -> Result<PortFlavour, HardwareError>;
    /// MAC address of the function on the far side of a representor
    async fn peer_mac(&self, netdev: &str) -> Result<Mac, HardwareError>;
}

#[derive(Debug, Deserialize)]
struct DevlinkFunction {
    hw_addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DevlinkPort {
    flavour: String,
    function: Option<DevlinkFunction>,
}

#[derive(Debug, Deserialize)]
struct DevlinkPortShow {
    port: BTreeMap<String, DevlinkPort>,
}

/// Reads representor properties through `devlink -j port show <netdev>`.
pub struct DevlinkSriov {
    exec: Arc<dyn Exec>,
}

impl DevlinkSriov {
    #[must_use]
    pub fn new(exec: Arc<dyn Exec>) -> Self {
        Self { exec }
    }

    async fn port(&self, netdev: &str) -> Result<DevlinkPort, HardwareError> {
        let cmd = Cmd::new("devlink").args(["-j", "port", "show", netdev]);
        let output = self.exec.run(&cmd).await?;
        let show: DevlinkPortShow =
            serde_json::from_str(&output).map_err(|e| HardwareError::Parse(netdev.to_string(), e))?;
        let (handle, port) = show
            .port
            .into_iter()
            .next()
            .ok_or_else(|| HardwareError::NoPort(netdev.to_string()))?;
        debug!("{netdev} is devlink port {handle} ({})", port.flavour);
        Ok(port)
    }
}

#[async_trait]
impl Sriov for DevlinkSriov {
    async fn port_flavour(&self, netdev: &str) -> Result<PortFlavour, HardwareError> {
        let port = self.port(netdev).await?;
        // EnumString with a default variant never fails
        Ok(port
            .flavour
            .parse()
            .unwrap_or(PortFlavour::Other(port.flavour)))
    }

    async fn peer_mac(&self, netdev: &str) -> Result<Mac, HardwareError> {
        let port = self.port(netdev).await?;
        let hw_addr = port
            .function
            .and_then(|f| f.hw_addr)
            .ok_or_else(|| HardwareError::NoPeerMac(netdev.to_string()))?;
        hw_addr
            .parse()
            .map_err(|_| HardwareError::BadMac(netdev.to_string(), hw_addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exec::FakeExec;
    use pretty_assertions::assert_eq;

    const PF_REP: &str = r#"{"port":{"pci/0000:03:00.0/1":{"type":"eth","netdev":"pf0hpf","flavour":"pcipf","controller":1,"pfnum":0,"external":true,"splittable":false,"function":{"hw_addr":"0c:42:a1:de:cf:7c"}}}}"#;
    const UPLINK: &str = r#"{"port":{"pci/0000:03:00.0/65535":{"type":"eth","netdev":"p0","flavour":"physical","port":0,"splittable":false}}}"#;

    #[tokio::test]
    async fn test_pf_representor() {
        let exec = Arc::new(FakeExec::strict());
        exec.expect("devlink -j port show pf0hpf", PF_REP)
            .expect("devlink -j port show pf0hpf", PF_REP);
        let sriov = DevlinkSriov::new(exec.clone());
        assert_eq!(sriov.port_flavour("pf0hpf").await.unwrap(), PortFlavour::PciPf);
        assert_eq!(
            sriov.peer_mac("pf0hpf").await.unwrap().to_string(),
            "0c:42:a1:de:cf:7c"
        );
        assert!(exec.called_matches_expected());
    }

    #[tokio::test]
    async fn test_uplink_has_no_peer() {
        let exec = Arc::new(FakeExec::strict());
        exec.expect("devlink -j port show p0", UPLINK)
            .expect("devlink -j port show p0", UPLINK)
            .expect("devlink -j port show p0", "not json");
        let sriov = DevlinkSriov::new(exec);
        assert_eq!(sriov.port_flavour("p0").await.unwrap(), PortFlavour::Physical);
        assert!(matches!(
            sriov.peer_mac("p0").await,
            Err(HardwareError::NoPeerMac(_))
        ));
        assert!(matches!(
            sriov.port_flavour("p0").await,
            Err(HardwareError::Parse(_, _))
        ));
    }

    #[test]
    fn unknown_flavours_are_kept() {
        assert_eq!(
            "virtual".parse::<PortFlavour>().unwrap(),
            PortFlavour::Other("virtual".to_string())
        );
        assert_eq!(PortFlavour::PciPf.to_string(), "pcipf");
    }
}
