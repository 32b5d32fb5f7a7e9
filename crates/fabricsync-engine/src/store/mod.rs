//! Persistence boundary for resources, transition history and alerts
//!
//! The engine never performs storage I/O itself; everything goes through these traits.
//! Implementations must be Send + Sync for use across async tasks.
//!
//! Writes are optimistic: [`ResourceStore::save`] compares the caller's `revision` with the
//! stored one and rejects the write with [`EngineError::StaleRevision`] when another writer
//! got there first. The engine never locks a resource.

mod memory;

pub use memory::{MemoryAlertStore, MemoryResourceStore, OperationCounts};

use async_trait::async_trait;
use fabricsync_core::{
    AlertStatus, AlertType, DriftStatus, ReconciliationAlert, Resource, ResourceKey,
    ResourceState, StateTransitionRecord,
};

use crate::error::{EngineError, Result};

/// Resource persistence
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get a resource by id
    async fn get(&self, id: &str) -> Result<Resource>;

    /// List resources matching a filter, ordered by key
    async fn list(&self, filter: &ResourceFilter) -> Result<Vec<Resource>>;

    /// Save a resource
    ///
    /// `resource.revision` must equal the stored revision (0 for a new resource). Returns the
    /// saved copy with its revision incremented.
    async fn save(&self, resource: &Resource) -> Result<Resource>;

    /// Append an immutable transition record
    async fn append_history(&self, record: &StateTransitionRecord) -> Result<()>;

    /// Transition history of a resource, oldest first
    async fn history(&self, resource_id: &str) -> Result<Vec<StateTransitionRecord>>;

    /// Find a resource by fabric and key
    async fn find_by_key(&self, fabric: &str, key: &ResourceKey) -> Result<Option<Resource>> {
        let filter = ResourceFilter::fabric(fabric)
            .with_namespace(&key.namespace)
            .with_kind(&key.kind);
        Ok(self
            .list(&filter)
            .await?
            .into_iter()
            .find(|r| r.key.name == key.name))
    }

    /// Check if a resource exists
    async fn exists(&self, id: &str) -> Result<bool> {
        match self.get(id).await {
            Ok(_) => Ok(true),
            Err(EngineError::ResourceNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Alert persistence
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Create a new alert
    async fn create(&self, alert: &ReconciliationAlert) -> Result<()>;

    /// Replace an existing alert
    async fn update(&self, alert: &ReconciliationAlert) -> Result<()>;

    /// Get an alert by id
    async fn get(&self, id: &str) -> Result<ReconciliationAlert>;

    /// Query alerts, oldest first
    async fn query(&self, filter: &AlertFilter) -> Result<Vec<ReconciliationAlert>>;

    /// Find the open (active or acknowledged) alert of a type for a resource
    async fn find_open(
        &self,
        fabric: &str,
        key: &ResourceKey,
        alert_type: AlertType,
    ) -> Result<Option<ReconciliationAlert>> {
        let filter = AlertFilter::fabric(fabric)
            .with_resource_key(key.clone())
            .with_type(alert_type)
            .open_only();
        Ok(self.query(&filter).await?.into_iter().next())
    }
}

/// Filter for listing resources
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub fabric: Option<String>,
    pub namespace: Option<String>,
    pub kind: Option<String>,
    pub state: Option<ResourceState>,
    pub drift_status: Option<DriftStatus>,
}

impl ResourceFilter {
    /// Match every resource
    pub fn all() -> Self {
        Self::default()
    }

    /// Match resources of one fabric
    pub fn fabric(fabric: impl Into<String>) -> Self {
        Self {
            fabric: Some(fabric.into()),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_drift_status(mut self, status: DriftStatus) -> Self {
        self.drift_status = Some(status);
        self
    }

    /// Check a resource against the filter
    pub fn matches(&self, resource: &Resource) -> bool {
        self.fabric.as_ref().is_none_or(|f| *f == resource.fabric)
            && self
                .namespace
                .as_ref()
                .is_none_or(|n| *n == resource.key.namespace)
            && self.kind.as_ref().is_none_or(|k| *k == resource.key.kind)
            && self.state.is_none_or(|s| s == resource.resource_state)
            && self.drift_status.is_none_or(|d| d == resource.drift_status)
    }
}

/// Filter for querying alerts
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub fabric: Option<String>,
    pub resource_id: Option<String>,
    pub resource_key: Option<ResourceKey>,
    pub alert_type: Option<AlertType>,
    /// Empty matches every status
    pub statuses: Vec<AlertStatus>,
    pub batch_id: Option<String>,
}

impl AlertFilter {
    /// Match every alert
    pub fn all() -> Self {
        Self::default()
    }

    /// Match alerts of one fabric
    pub fn fabric(fabric: impl Into<String>) -> Self {
        Self {
            fabric: Some(fabric.into()),
            ..Default::default()
        }
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_resource_key(mut self, key: ResourceKey) -> Self {
        self.resource_key = Some(key);
        self
    }

    pub fn with_type(mut self, alert_type: AlertType) -> Self {
        self.alert_type = Some(alert_type);
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Only active and acknowledged alerts
    pub fn open_only(mut self) -> Self {
        self.statuses = vec![AlertStatus::Active, AlertStatus::Acknowledged];
        self
    }

    /// Check an alert against the filter
    pub fn matches(&self, alert: &ReconciliationAlert) -> bool {
        self.fabric.as_ref().is_none_or(|f| *f == alert.fabric)
            && self
                .resource_id
                .as_ref()
                .is_none_or(|id| *id == alert.resource_id)
            && self
                .resource_key
                .as_ref()
                .is_none_or(|k| *k == alert.resource_key)
            && self.alert_type.is_none_or(|t| t == alert.alert_type)
            && (self.statuses.is_empty() || self.statuses.contains(&alert.status))
            && self
                .batch_id
                .as_ref()
                .is_none_or(|b| alert.batch_id.as_ref() == Some(b))
    }
}
