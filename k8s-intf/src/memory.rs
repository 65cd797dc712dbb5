// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{AnnotationChanges, NodeRecord, NodeStore, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Node records kept in memory.
#[derive(Default)]
pub struct MemoryNodeStore {
    nodes: Mutex<BTreeMap<String, NodeRecord>>,
    updates: Mutex<usize>,
}

impl MemoryNodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_node(self, node: NodeRecord) -> Self {
        self.nodes.lock().insert(node.name.clone(), node);
        self
    }

    /// Current record of a node, if any
    #[must_use]
    pub fn node(&self, name: &str) -> Option<NodeRecord> {
        self.nodes.lock().get(name).cloned()
    }

    /// Number of successful annotation updates
    #[must_use]
    pub fn updates(&self) -> usize {
        *self.updates.lock()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, StoreError> {
        self.node(name)
            .ok_or_else(|| StoreError::NodeNotFound(name.to_string()))
    }

    async fn set_annotations(
        &self,
        name: &str,
        changes: &AnnotationChanges,
    ) -> Result<(), StoreError> {
        let mut nodes = self.nodes.lock();
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| StoreError::NodeNotFound(name.to_string()))?;
        node.apply(changes);
        *self.updates.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn annotate_known_node_only() {
        let store = MemoryNodeStore::new().with_node(NodeRecord::new("node1"));
        let changes = AnnotationChanges::from([("k".to_string(), Some("v".to_string()))]);
        store.set_annotations("node1", &changes).await.unwrap();
        assert_eq!(
            store.get_node("node1").await.unwrap().annotation("k"),
            Some("v")
        );
        assert!(matches!(
            store.set_annotations("node2", &changes).await,
            Err(StoreError::NodeNotFound(_))
        ));
        assert_eq!(store.updates(), 1);
    }
}
