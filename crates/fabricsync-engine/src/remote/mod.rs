//! Git and cluster collaborators
//!
//! The engine only ever asks these traits to mutate the outside world. Implementations talk
//! to a real Git server or Kubernetes API; the recording doubles in [`recording`] are used by
//! the offline CLI and tests.

mod recording;

pub use recording::{RecordingCluster, RecordingGit, RemoteCall};

use async_trait::async_trait;
use fabricsync_core::{Resource, SpecValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

/// Result of a collaborator call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Collaborator-specific audit data (commit id, cluster uid, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl RemoteOutcome {
    /// Successful call
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Failed call
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            details: Map::new(),
        }
    }

    /// Attach a detail entry
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Convert an unsuccessful outcome into a connectivity error
    pub fn into_result(self, collaborator: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(EngineError::connectivity(
                collaborator,
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// Writes to the Git repository holding desired specs
#[async_trait]
pub trait GitCollaborator: Send + Sync {
    /// Commit the resource's actual spec as a new desired spec
    async fn import_resource(&self, resource: &Resource) -> RemoteOutcome;

    /// Overwrite the resource's desired spec in Git
    async fn update_spec(&self, resource: &Resource, spec: &SpecValue) -> RemoteOutcome;
}

/// Writes to the running cluster
#[async_trait]
pub trait ClusterCollaborator: Send + Sync {
    /// Apply a spec to the cluster
    async fn apply_resource(&self, resource: &Resource, spec: &SpecValue) -> RemoteOutcome;

    /// Delete the resource from the cluster
    async fn delete_resource(&self, resource: &Resource) -> RemoteOutcome;

    /// Whether the cluster currently accepts writes
    async fn is_available(&self) -> bool {
        true
    }
}
