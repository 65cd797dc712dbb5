// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{AnnotationChanges, NodeRecord, NodeStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::PostParams;
use kube::{Api, Client};
use std::net::IpAddr;
use tracing::{debug, info, warn};

const NUM_CONFLICT_RETRIES: usize = 3;
const INTERNAL_IP: &str = "InternalIP";

/// Node records backed by the Kubernetes API server.
pub struct KubeNodeStore {
    api: Api<Node>,
}

impl KubeNodeStore {
    /// Connect with the in-cluster or kubeconfig configuration
    pub async fn try_default() -> Result<Self, StoreError> {
        let client = Client::try_default().await?;
        info!("Connected to the Kubernetes API server");
        Ok(Self::from_client(client))
    }

    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    async fn fetch(&self, name: &str) -> Result<Node, StoreError> {
        match self.api.get(name).await {
            Ok(node) => Ok(node),
            Err(kube::Error::Api(api_error)) if api_error.code == 404 => {
                Err(StoreError::NodeNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn to_record(name: &str, node: Node) -> NodeRecord {
    let internal_ips = node
        .status
        .and_then(|status| status.addresses)
        .unwrap_or_default()
        .into_iter()
        .filter(|address| address.type_ == INTERNAL_IP)
        .filter_map(|address| match address.address.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!("Ignoring address {} of node {name}: {e}", address.address);
                None
            }
        })
        .collect();
    NodeRecord {
        name: name.to_string(),
        annotations: node.metadata.annotations.unwrap_or_default(),
        internal_ips,
    }
}

#[async_trait]
impl NodeStore for KubeNodeStore {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, StoreError> {
        let node = self.fetch(name).await?;
        Ok(to_record(name, node))
    }

    async fn set_annotations(
        &self,
        name: &str,
        changes: &AnnotationChanges,
    ) -> Result<(), StoreError> {
        for attempt_num in 0..NUM_CONFLICT_RETRIES {
            let mut node = self.fetch(name).await?;
            let mut record = NodeRecord {
                annotations: node.metadata.annotations.take().unwrap_or_default(),
                ..NodeRecord::new(name)
            };
            record.apply(changes);
            node.metadata.annotations = Some(record.annotations);

            match self.api.replace(name, &PostParams::default(), &node).await {
                Ok(_) => {
                    debug!("Updated {} annotations of node {name}", changes.len());
                    return Ok(());
                }
                // resource version conflict, try again
                Err(kube::Error::Api(api_error)) if api_error.code == 409 => {
                    debug!("Conflict updating node {name} (attempt {attempt_num})");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::MaxConflictRetriesExceeded(
            name.to_string(),
            NUM_CONFLICT_RETRIES,
        ))
    }
}
