// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Node {0} not found")]
    NodeNotFound(String),
    #[cfg(feature = "client")]
    #[error("Kubernetes client error: {0}")]
    Client(#[from] kube::Error),
    #[error("Giving up on node {0} after {1} conflicting updates")]
    MaxConflictRetriesExceeded(String, usize),
    #[error("Malformed annotation {0}: {1}")]
    Annotation(&'static str, serde_json::Error),
    #[error("Node store backend error: {0}")]
    Backend(String),
}

/// The parts of a node object the gateway cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// `InternalIP` addresses from the node status
    #[serde(default)]
    pub internal_ips: Vec<IpAddr>,
}

impl NodeRecord {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Apply annotation changes in place
    pub fn apply(&mut self, changes: &AnnotationChanges) {
        for (key, value) in changes {
            match value {
                Some(value) => {
                    self.annotations.insert(key.clone(), value.clone());
                }
                None => {
                    self.annotations.remove(key);
                }
            }
        }
    }
}

/// Annotation updates: `Some` sets a value, `None` removes the key.
pub type AnnotationChanges = BTreeMap<String, Option<String>>;

/// Read and annotate node records.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, StoreError>;
    async fn set_annotations(
        &self,
        name: &str,
        changes: &AnnotationChanges,
    ) -> Result<(), StoreError>;
}
