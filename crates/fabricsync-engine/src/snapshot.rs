//! Fabric snapshot files
//!
//! A snapshot captures what Git and the cluster say about a fabric at one point in time, so
//! the engine can run offline against an in-memory store:
//!
//! ```yaml
//! fabric: lab
//! resources:
//!   - kind: VPC
//!     name: vpc-1
//!     state: synced
//!     desired: { subnet: 10.0.0.0/16 }
//!     actual: { subnet: 10.0.1.0/16 }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use fabricsync_core::{Resource, ResourceKey, ResourceState, SpecValue};

use crate::error::{EngineError, Result};
use crate::store::MemoryResourceStore;

/// A fabric as seen from Git and the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FabricSnapshot {
    pub fabric: String,
    #[serde(default)]
    pub resources: Vec<SnapshotResource>,
}

/// One resource entry of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResource {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub state: ResourceState,
    /// Spec from Git
    #[serde(default)]
    pub desired: Option<SpecValue>,
    /// Spec reported by the cluster
    #[serde(default)]
    pub actual: Option<SpecValue>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub available_commit: Option<String>,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl FabricSnapshot {
    /// Load a snapshot; `.json` files are read as JSON, anything else as YAML
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Reject empty names and duplicate keys
    pub fn validate(&self) -> Result<()> {
        if self.fabric.trim().is_empty() {
            return Err(EngineError::Validation("snapshot has no fabric name".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for entry in &self.resources {
            if entry.kind.is_empty() || entry.name.is_empty() {
                return Err(EngineError::Validation(format!(
                    "snapshot resource '{}/{}/{}' needs a kind and a name",
                    entry.namespace, entry.kind, entry.name
                )));
            }
            if !seen.insert(entry.key()) {
                return Err(EngineError::Validation(format!(
                    "snapshot lists {} twice",
                    entry.key()
                )));
            }
        }
        Ok(())
    }

    /// Engine resources for every entry
    pub fn to_resources(&self) -> Vec<Resource> {
        self.resources
            .iter()
            .map(|entry| entry.to_resource(&self.fabric))
            .collect()
    }

    /// An in-memory store seeded with the snapshot
    pub fn into_store(self) -> MemoryResourceStore {
        MemoryResourceStore::with_resources(self.to_resources())
    }
}

impl SnapshotResource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.namespace, &self.kind, &self.name)
    }

    fn to_resource(&self, fabric: &str) -> Resource {
        let mut resource = Resource::new(fabric, self.key()).with_state(self.state);
        resource.desired_spec = self.desired.clone();
        resource.actual_spec = self.actual.clone();
        resource.commit = self.commit.clone();
        resource.available_commit = self.available_commit.clone();
        if let Some(first_seen) = self.first_seen {
            resource = resource.with_first_seen(first_seen);
        }
        resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResourceStore;
    use serde_json::json;
    use std::io::Write;

    const SNAPSHOT: &str = r#"
fabric: lab
resources:
  - kind: VPC
    name: vpc-1
    state: synced
    desired: { subnet: 10.0.0.0/16 }
    actual: { subnet: 10.0.1.0/16 }
  - namespace: edge
    kind: Subnet
    name: sub-1
    actual: { vpc: vpc-1 }
"#;

    #[test]
    fn test_parse_yaml_snapshot() {
        let snapshot: FabricSnapshot = serde_yaml::from_str(SNAPSHOT).unwrap();
        snapshot.validate().unwrap();

        let resources = snapshot.to_resources();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].id, "lab:default/VPC/vpc-1");
        assert_eq!(resources[0].resource_state, ResourceState::Synced);
        assert_eq!(resources[0].desired_spec, Some(json!({"subnet": "10.0.0.0/16"})));
        assert_eq!(resources[1].key.namespace, "edge");
        assert_eq!(resources[1].resource_state, ResourceState::Draft);
        assert!(resources[1].desired_spec.is_none());
    }

    #[test]
    fn test_load_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"fabric": "lab", "resources": [{{"kind": "VPC", "name": "a", "actual": {{}}}}]}}"#
        )
        .unwrap();

        let snapshot = FabricSnapshot::load_from(file.path()).unwrap();
        assert_eq!(snapshot.resources[0].name, "a");
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let snapshot = FabricSnapshot {
            fabric: "lab".to_string(),
            resources: vec![
                serde_yaml::from_str("{kind: VPC, name: a}").unwrap(),
                serde_yaml::from_str("{kind: VPC, name: a}").unwrap(),
            ],
        };
        let err = snapshot.validate().unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[tokio::test]
    async fn test_into_store() {
        let snapshot: FabricSnapshot = serde_yaml::from_str(SNAPSHOT).unwrap();
        let store = snapshot.into_store();
        let vpc = store.get("lab:default/VPC/vpc-1").await.unwrap();
        assert_eq!(vpc.revision, 0);
        assert_eq!(vpc.resource_state, ResourceState::Synced);
    }
}
