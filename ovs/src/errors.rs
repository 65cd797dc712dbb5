// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use exec::ExecError;
use hardware::HardwareError;
use interface_manager::NetlinkError;

#[derive(Debug, thiserror::Error)]
pub enum OvsError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Netlink(#[from] NetlinkError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error("Unexpected {0} '{1}'")]
    Parse(&'static str, String),
    #[error("Bridge {0} has no uplink port")]
    NoUplink(String),
    #[error("Bridge {0} has no host representor port")]
    NoHostRepresentor(String),
    #[error("Open vSwitch has no system-id")]
    NoChassisId,
    #[error("Uplink {0} has no MAC address")]
    NoMac(String),
}
