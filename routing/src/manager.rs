// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{RouteEntry, RouteError, RouteKey};
use interface_manager::{Manager, Netlink, NetlinkError, Route};
use rekon::{Observe, Reconcile};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Keeps a set of desired routes installed in the kernel.
///
/// The desired set is guarded by an async mutex which is held for the whole of every
/// apply, so adds and reconciliation passes serialize and the kernel ends up with
/// whatever was written last.  Routes not in the set are never touched.
pub struct RouteManager {
    routes: Manager<Route>,
    desired: Mutex<BTreeMap<RouteKey, RouteEntry>>,
    trigger: Notify,
}

impl RouteManager {
    #[must_use]
    pub fn new(netlink: Arc<dyn Netlink>) -> Self {
        Self {
            routes: Manager::new(netlink),
            desired: Mutex::new(BTreeMap::new()),
            trigger: Notify::new(),
        }
    }

    /// Insert or replace `entry` and apply it right away.  The entry is kept (and
    /// retried by later passes) even when applying it fails.
    pub async fn add(&self, entry: RouteEntry) -> Result<(), RouteError> {
        entry.validate()?;
        let mut desired = self.desired.lock().await;
        desired.insert(entry.key(), entry.clone());
        let observed = self.routes.observe().await?;
        self.apply(&entry, &observed).await
    }

    /// Forget `entry` and remove it from the kernel if it is there.
    pub async fn del(&self, entry: &RouteEntry) -> Result<(), RouteError> {
        let mut desired = self.desired.lock().await;
        desired.remove(&entry.key());
        let link = match self.routes.netlink().link_by_name(&entry.link).await {
            Ok(link) => link,
            Err(NetlinkError::LinkNotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match self.routes.netlink().route_del(&entry.to_route(link.index)).await {
            Ok(()) => {
                info!("Removed route {entry}");
                Ok(())
            }
            Err(NetlinkError::NotFound(_)) => Ok(()),
            Err(e) => Err(RouteError::Apply(entry.dst, e)),
        }
    }

    /// Request an out-of-schedule reconciliation pass.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// The desired routes, ordered by identity
    pub async fn entries(&self) -> Vec<RouteEntry> {
        self.desired.lock().await.values().cloned().collect()
    }

    async fn apply(&self, entry: &RouteEntry, observed: &[Route]) -> Result<(), RouteError> {
        let link = match self.routes.netlink().link_by_name(&entry.link).await {
            Ok(link) => link,
            Err(NetlinkError::LinkNotFound(name)) => {
                return Err(RouteError::LinkNotFound(name, entry.dst));
            }
            Err(e) => return Err(e.into()),
        };
        let wanted = entry.to_route(link.index);
        let current = observed
            .iter()
            .find(|r| r.dst == wanted.dst && r.table == wanted.table && r.link_index == link.index);
        if current != Some(&wanted) {
            debug!("Applying route {entry}");
        }
        self.routes
            .reconcile(&wanted, current)
            .await
            .map_err(|e| RouteError::Apply(entry.dst, e))
    }

    /// One pass over every desired route.  Failures are logged and counted; the pass
    /// always visits every route.
    pub async fn reconcile(&self) -> Result<(), RouteError> {
        let desired = self.desired.lock().await;
        if desired.is_empty() {
            return Ok(());
        }
        let observed = self.routes.observe().await?;
        let mut failed = 0;
        for entry in desired.values() {
            if let Err(e) = self.apply(entry, &observed).await {
                warn!("{e}");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(RouteError::Incomplete(failed, desired.len()));
        }
        Ok(())
    }

    /// Reconcile every `interval` and whenever triggered, until `stop` is cancelled.
    pub async fn run(&self, stop: CancellationToken, interval: Duration) {
        info!("Route manager started, sync interval {interval:?}");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => {},
                () = self.trigger.notified() => {},
            }
            if let Err(e) = self.reconcile().await {
                error!("Route reconciliation failed: {e}");
            }
        }
        info!("Route manager stopped");
    }
}
