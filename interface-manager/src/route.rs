// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{Manager, NetlinkError, Route, RouteFilter};
use rekon::{Create, Observe, Reconcile, Remove, Update};
use tracing::debug;

impl Observe for Manager<Route> {
    type Observation<'a>
        = Result<Vec<Route>, NetlinkError>
    where
        Self: 'a;

    async fn observe<'a>(&self) -> Self::Observation<'a>
    where
        Self: 'a,
    {
        self.netlink.routes(&RouteFilter::default()).await
    }
}

impl Create for Manager<Route> {
    type Requirement<'a>
        = &'a Route
    where
        Self: 'a;
    type Outcome<'a>
        = Result<(), NetlinkError>
    where
        Self: 'a;

    async fn create<'a>(&self, requirement: Self::Requirement<'a>) -> Self::Outcome<'a>
    where
        Self: 'a,
    {
        self.netlink.route_replace(requirement).await
    }
}

impl Update for Manager<Route> {
    type Requirement<'a>
        = &'a Route
    where
        Self: 'a;
    type Observation<'a>
        = &'a Route
    where
        Self: 'a;
    type Outcome<'a>
        = Result<(), NetlinkError>
    where
        Self: 'a;

    async fn update<'a>(
        &self,
        requirement: Self::Requirement<'a>,
        observation: Self::Observation<'a>,
    ) -> Self::Outcome<'a>
    where
        Self: 'a,
    {
        debug!("Route {observation} drifted, replacing with {requirement}");
        self.netlink.route_replace(requirement).await
    }
}

impl Remove for Manager<Route> {
    type Observation<'a>
        = &'a Route
    where
        Self: 'a;
    type Outcome<'a>
        = Result<(), NetlinkError>
    where
        Self: 'a;

    async fn remove<'a>(&self, observation: Self::Observation<'a>) -> Self::Outcome<'a>
    where
        Self: 'a,
    {
        self.netlink.route_del(observation).await
    }
}

impl Reconcile for Manager<Route> {
    type Requirement<'a>
        = &'a Route
    where
        Self: 'a;
    type Observation<'a>
        = Option<&'a Route>
    where
        Self: 'a;
    type Outcome<'a>
        = Result<(), NetlinkError>
    where
        Self: 'a;

    async fn reconcile<'a>(
        &self,
        requirement: Self::Requirement<'a>,
        observation: Self::Observation<'a>,
    ) -> Self::Outcome<'a>
    where
        Self: 'a,
    {
        match observation {
            None => self.create(requirement).await,
            Some(observed) if observed == requirement => Ok(()),
            Some(observed) => self.update(requirement, observed).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{FakeNetlink, Manager, Netlink, Route};
    use pretty_assertions::assert_eq;
    use rekon::{Observe, Reconcile, Remove};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reconcile_route() {
        let kernel = Arc::new(FakeNetlink::new());
        let eth0 = kernel.add_link("eth0", None);
        let manager = Manager::<Route>::new(kernel.clone());

        let mut wanted = Route::new("169.254.169.1/32".parse().unwrap(), eth0);
        wanted.source = Some("192.168.1.10".parse().unwrap());
        manager.reconcile(&wanted, None).await.unwrap();
        assert_eq!(manager.observe().await.unwrap(), vec![wanted]);

        let mut drifted = wanted;
        drifted.source = None;
        kernel.route_replace(&drifted).await.unwrap();
        manager.reconcile(&wanted, Some(&drifted)).await.unwrap();
        assert_eq!(kernel.all_routes(), vec![wanted]);

        manager.remove(&wanted).await.unwrap();
        assert!(kernel.all_routes().is_empty());
    }
}
