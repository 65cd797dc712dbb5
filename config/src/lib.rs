// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration of the node gateway.
//!
//! A [`GatewayConfig`] is built once at startup and handed, by value or reference, to
//! every component that needs it.  Nothing in the workspace reads process-wide
//! configuration state.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod consts;
pub mod errors;
pub mod family;
pub mod gateway;
pub mod masquerade;

pub use errors::{ConfigError, ConfigResult};
pub use family::IpFamily;
pub use gateway::{Features, GatewayConfig, GatewayConfigBuilder, GatewayMode, Intervals};
pub use masquerade::{MasqueradeConfig, MasqueradeIps};
