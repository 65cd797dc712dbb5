// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Kernel network state: links, addresses, routes and policy rules.
//!
//! All kernel access goes through the [`Netlink`] trait.  [`RtNetlink`] talks to the
//! kernel (optionally inside another network namespace), while `FakeNetlink` (feature
//! `testing`) keeps an in-memory model for tests.  Addresses and routes are managed
//! through [`Manager`], which implements the `rekon` reconciliation vocabulary.

#![deny(clippy::all, clippy::pedantic)]

mod address;
mod mac;
mod migrate;
pub mod netlink;
pub mod netns;
mod route;

use std::marker::PhantomData;
use std::sync::Arc;

pub use mac::{Mac, MacParseError};
pub use migrate::migrate_ip_config;
#[cfg(any(test, feature = "testing"))]
pub use netlink::FakeNetlink;
pub use netlink::{IfAddr, Link, Netlink, NetlinkError, RtNetlink, Route, RouteFilter, Rule};

use tracectl::trace_target;
trace_target!("interface-manager", LevelFilter::INFO, &["netlink", "kernel"]);

/// Manages one kind of kernel object of type `R` through a [`Netlink`] seam.
pub struct Manager<R> {
    netlink: Arc<dyn Netlink>,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Manager<R> {
    #[must_use]
    pub fn new(netlink: Arc<dyn Netlink>) -> Self {
        Self {
            netlink,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn netlink(&self) -> &Arc<dyn Netlink> {
        &self.netlink
    }
}

impl<R> Clone for Manager<R> {
    fn clone(&self) -> Self {
        Self::new(self.netlink.clone())
    }
}
