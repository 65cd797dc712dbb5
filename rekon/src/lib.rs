// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Vocabulary traits for observe / reconcile control loops.
//!
//! A manager observes some piece of external state, compares it with a requirement and
//! then creates, updates or removes things until the two agree.  The traits are kept
//! deliberately small so each managed resource can pick the borrowing story it needs
//! through the associated (generic) types.

#![deny(clippy::all, clippy::pedantic)]
#![allow(async_fn_in_trait)]

/// Read the current state of the managed resource.
pub trait Observe {
    type Observation<'a>
    where
        Self: 'a;

    async fn observe<'a>(&self) -> Self::Observation<'a>
    where
        Self: 'a;
}

/// Bring a resource into existence from its requirement.
pub trait Create {
    type Requirement<'a>
    where
        Self: 'a;
    type Outcome<'a>
    where
        Self: 'a;

    async fn create<'a>(&self, requirement: Self::Requirement<'a>) -> Self::Outcome<'a>
    where
        Self: 'a;
}

/// Modify an observed resource so that it satisfies the requirement.
pub trait Update {
    type Requirement<'a>
    where
        Self: 'a;
    type Observation<'a>
    where
        Self: 'a;
    type Outcome<'a>
    where
        Self: 'a;

    async fn update<'a>(
        &self,
        requirement: Self::Requirement<'a>,
        observation: Self::Observation<'a>,
    ) -> Self::Outcome<'a>
    where
        Self: 'a;
}

/// Remove an observed resource.
pub trait Remove {
    type Observation<'a>
    where
        Self: 'a;
    type Outcome<'a>
    where
        Self: 'a;

    async fn remove<'a>(&self, observation: Self::Observation<'a>) -> Self::Outcome<'a>
    where
        Self: 'a;
}

/// Drive an (optional) observation towards a requirement.
pub trait Reconcile {
    type Requirement<'a>
    where
        Self: 'a;
    type Observation<'a>
    where
        Self: 'a;
    type Outcome<'a>
    where
        Self: 'a;

    async fn reconcile<'a>(
        &self,
        requirement: Self::Requirement<'a>,
        observation: Self::Observation<'a>,
    ) -> Self::Outcome<'a>
    where
        Self: 'a;
}
