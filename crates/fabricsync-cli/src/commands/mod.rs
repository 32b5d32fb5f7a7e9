//! CLI commands

pub mod conflicts;
pub mod drift;
pub mod orphans;
pub mod reconcile;
pub mod transitions;

use std::path::Path;
use std::sync::Arc;

use fabricsync_core::{ReconcilePolicy, Resource, ResourceKey};
use fabricsync_engine::{
    FabricReconciler, FabricSnapshot, MemoryAlertStore, RecordingCluster, RecordingGit,
    ResourceFilter, ResourceStore,
};

use crate::error::{CliError, Result};

/// A snapshot loaded into in-memory stores, with offline collaborators
pub struct Session {
    pub fabric: String,
    pub reconciler: FabricReconciler,
    pub git: Arc<RecordingGit>,
    pub cluster: Arc<RecordingCluster>,
}

impl Session {
    /// Load the snapshot at `snapshot` under the policy file, or the default policy
    pub fn open(snapshot: &Path, policy: Option<&Path>) -> Result<Self> {
        let policy = match policy {
            Some(path) => ReconcilePolicy::load_from(path).map_err(|e| {
                CliError::validation_with_help(
                    format!("cannot load policy {}: {}", path.display(), e),
                    "policy files are YAML documents; omit --policy to use the defaults",
                )
            })?,
            None => ReconcilePolicy::default(),
        };

        let snapshot = FabricSnapshot::load_from(snapshot)?;
        let fabric = snapshot.fabric.clone();
        tracing::debug!(
            fabric = %fabric,
            resources = snapshot.resources.len(),
            "snapshot loaded"
        );

        let git = Arc::new(RecordingGit::new());
        let cluster = Arc::new(RecordingCluster::new());
        let reconciler = FabricReconciler::new(
            Arc::new(snapshot.into_store()),
            Arc::new(MemoryAlertStore::new()),
            git.clone(),
            cluster.clone(),
            Arc::new(policy),
        );

        Ok(Self {
            fabric,
            reconciler,
            git,
            cluster,
        })
    }

    /// Every resource of the fabric, in store order
    pub async fn resources(&self) -> Result<Vec<Resource>> {
        Ok(self
            .reconciler
            .resources()
            .list(&ResourceFilter::fabric(&self.fabric))
            .await?)
    }

    /// Look up a resource by its `namespace/kind/name` key
    pub async fn find(&self, key: &str) -> Result<Resource> {
        let key: ResourceKey = key.parse()?;
        self.reconciler
            .resources()
            .find_by_key(&self.fabric, &key)
            .await?
            .ok_or_else(|| {
                CliError::validation(format!("{} is not part of fabric '{}'", key, self.fabric))
            })
    }
}
