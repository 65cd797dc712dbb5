// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{IfAddr, Manager, NetlinkError};
use rekon::{Create, Observe, Reconcile, Remove};

impl Observe for Manager<IfAddr> {
    type Observation<'a>
        = Result<Vec<IfAddr>, NetlinkError>
    where
        Self: 'a;

    async fn observe<'a>(&self) -> Self::Observation<'a>
    where
        Self: 'a,
    {
        self.netlink.addresses(None, None).await
    }
}

impl Create for Manager<IfAddr> {
    type Requirement<'a>
        = &'a IfAddr
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
        match self.netlink.address_add(requirement).await {
            Ok(()) | Err(NetlinkError::Exists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Remove for Manager<IfAddr> {
    type Observation<'a>
        = &'a IfAddr
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
        self.netlink.address_del(observation).await
    }
}

/// Addresses have no mutable attributes: present is good enough.
impl Reconcile for Manager<IfAddr> {
    type Requirement<'a>
        = &'a IfAddr
    where
        Self: 'a;
    type Observation<'a>
        = Option<&'a IfAddr>
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
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{FakeNetlink, IfAddr, Manager};
    use pretty_assertions::assert_eq;
    use rekon::{Observe, Reconcile, Remove};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reconcile_address_is_idempotent() {
        let kernel = Arc::new(FakeNetlink::new());
        let br = kernel.add_link("breth0", None);
        let manager = Manager::<IfAddr>::new(kernel.clone());
        let addr = IfAddr::new(br, "169.254.169.2/29".parse().unwrap());

        manager.reconcile(&addr, None).await.unwrap();
        // a stale observation must not produce a duplicate
        manager.reconcile(&addr, None).await.unwrap();
        assert_eq!(manager.observe().await.unwrap(), vec![addr]);

        manager.remove(&addr).await.unwrap();
        assert!(kernel.addresses_of("breth0").is_empty());
    }
}
