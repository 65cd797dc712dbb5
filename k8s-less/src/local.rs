// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use async_trait::async_trait;
use k8s_intf::{AnnotationChanges, NodeRecord, NodeStore, StoreError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

#[allow(unused)]
use tracing::{debug, error, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Option<Self> {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Some(Self::Yaml)
            }
            Some(ext) if ext.eq_ignore_ascii_case("json") => Some(Self::Json),
            _ => None,
        }
    }

    fn decode(self, path: &Path, text: &str) -> Result<NodeRecord, StoreError> {
        match self {
            Format::Yaml => serde_yaml_ng::from_str(text).map_err(|e| {
                StoreError::Backend(format!("Failed to deserialize {}: {e}", path.display()))
            }),
            Format::Json => serde_json::from_str(text).map_err(|e| {
                StoreError::Backend(format!("Failed to deserialize {}: {e}", path.display()))
            }),
        }
    }

    fn encode(self, path: &Path, node: &NodeRecord) -> Result<String, StoreError> {
        match self {
            Format::Yaml => serde_yaml_ng::to_string(node).map_err(|e| {
                StoreError::Backend(format!("Failed to serialize {}: {e}", path.display()))
            }),
            Format::Json => serde_json::to_string_pretty(node).map_err(|e| {
                StoreError::Backend(format!("Failed to serialize {}: {e}", path.display()))
            }),
        }
    }
}

/// Node records kept as files in a directory, one file per node named
/// `<node>.yaml`, `<node>.yml` or `<node>.json`.  Annotation updates are written back
/// in the format the record was read in.
pub struct FileNodeStore {
    dir: PathBuf,
    // serializes read-modify-write cycles of this process
    lock: Mutex<()>,
}

impl FileNodeStore {
    /// Use directory `dir`, creating it if needed
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            StoreError::Backend(format!(
                "Failed to create directory '{}': {e}",
                dir.display()
            ))
        })?;
        debug!("Node records in directory '{}'", dir.display());
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    async fn locate(&self, name: &str) -> Result<(PathBuf, Format), StoreError> {
        for ext in ["yaml", "yml", "json"] {
            let path = self.dir.join(format!("{name}.{ext}"));
            if fs::try_exists(&path).await.unwrap_or(false)
                && let Some(format) = Format::of(&path)
            {
                return Ok((path, format));
            }
        }
        Err(StoreError::NodeNotFound(name.to_string()))
    }

    async fn load(&self, name: &str) -> Result<(PathBuf, Format, NodeRecord), StoreError> {
        let (path, format) = self.locate(name).await?;
        trace!("Loading node record from {}", path.display());
        let text = fs::read_to_string(&path).await.map_err(|e| {
            StoreError::Backend(format!("Failed to read {}: {e}", path.display()))
        })?;
        let mut node = format.decode(&path, &text)?;
        if node.name.is_empty() {
            node.name = name.to_string();
        }
        Ok((path, format, node))
    }
}

#[async_trait]
impl NodeStore for FileNodeStore {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, StoreError> {
        let _guard = self.lock.lock().await;
        let (_, _, node) = self.load(name).await?;
        Ok(node)
    }

    async fn set_annotations(
        &self,
        name: &str,
        changes: &AnnotationChanges,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let (path, format, mut node) = self.load(name).await?;
        node.apply(changes);
        let text = format.encode(&path, &node)?;
        fs::write(&path, text).await.map_err(|e| {
            StoreError::Backend(format!("Failed to write {}: {e}", path.display()))
        })?;
        debug!("Updated {} annotations in {}", changes.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::IpAddr;
    use tracing_test::traced_test;

    fn scratch_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("k8s-less-{test}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    #[traced_test]
    async fn test_yaml_node_record() {
        let dir = scratch_dir("yaml");
        let store = FileNodeStore::new(&dir).await.unwrap();
        let yaml = "
name: node1
annotations:
  k8s.ovn.org/node-masquerade-subnet: '{\"ipv4\":\"170.254.0.0/16\"}'
internal_ips:
  - 192.168.1.10
";
        std::fs::write(dir.join("node1.yaml"), yaml).unwrap();

        let node = store.get_node("node1").await.unwrap();
        assert_eq!(node.internal_ips, vec!["192.168.1.10".parse::<IpAddr>().unwrap()]);
        assert_eq!(
            node.annotation("k8s.ovn.org/node-masquerade-subnet"),
            Some("{\"ipv4\":\"170.254.0.0/16\"}")
        );

        let changes = AnnotationChanges::from([
            ("k8s.ovn.org/node-masquerade-subnet".to_string(), None),
            (
                "k8s.ovn.org/gateway-mtu-support".to_string(),
                Some("false".to_string()),
            ),
        ]);
        store.set_annotations("node1", &changes).await.unwrap();

        // written back, still yaml
        let node = store.get_node("node1").await.unwrap();
        assert_eq!(node.annotation("k8s.ovn.org/node-masquerade-subnet"), None);
        assert_eq!(node.annotation("k8s.ovn.org/gateway-mtu-support"), Some("false"));
        assert_eq!(node.internal_ips.len(), 1);
        let text = std::fs::read_to_string(dir.join("node1.yaml")).unwrap();
        assert!(text.contains("gateway-mtu-support"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_json_record_without_name() {
        let dir = scratch_dir("json");
        let store = FileNodeStore::new(&dir).await.unwrap();
        std::fs::write(dir.join("node2.json"), r#"{"annotations":{}}"#).unwrap();
        let node = store.get_node("node2").await.unwrap();
        assert_eq!(node.name, "node2");
        assert!(node.internal_ips.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_missing_and_corrupt() {
        let dir = scratch_dir("missing");
        let store = FileNodeStore::new(&dir).await.unwrap();
        assert!(matches!(
            store.get_node("nope").await,
            Err(StoreError::NodeNotFound(_))
        ));
        std::fs::write(dir.join("bad.json"), "{").unwrap();
        assert!(matches!(
            store.get_node("bad").await,
            Err(StoreError::Backend(_))
        ));
    }
}
