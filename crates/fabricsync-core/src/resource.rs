//! Fabric resources with their desired/actual specs and drift bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CoreError;
use crate::lifecycle::ResourceState;
use crate::value::{self, SpecValue};

/// Identity of a resource inside a fabric (`namespace/kind/name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

impl ResourceKey {
    /// Create a new key
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

impl FromStr for ResourceKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [namespace, kind, name] if !kind.is_empty() && !name.is_empty() => {
                Ok(Self::new(*namespace, *kind, *name))
            }
            _ => Err(CoreError::InvalidResourceKey {
                value: s.to_string(),
            }),
        }
    }
}

/// Drift classification of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    InSync,
    SpecDrift,
    /// Tracked in Git, missing from the cluster
    DesiredOnly,
    /// Running in the cluster, missing from Git
    ActualOnly,
    CreationPending,
    DeletionPending,
}

impl DriftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InSync => "in_sync",
            Self::SpecDrift => "spec_drift",
            Self::DesiredOnly => "desired_only",
            Self::ActualOnly => "actual_only",
            Self::CreationPending => "creation_pending",
            Self::DeletionPending => "deletion_pending",
        }
    }
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for DriftStatus {
    fn default() -> Self {
        Self::InSync
    }
}

/// A resource as known to the reconciliation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Store identifier
    pub id: String,

    /// Owning fabric
    pub fabric: String,

    /// Namespace, kind and name
    #[serde(flatten)]
    pub key: ResourceKey,

    /// Spec as committed in Git
    #[serde(default)]
    pub desired_spec: Option<SpecValue>,

    /// Spec as observed in the cluster
    #[serde(default)]
    pub actual_spec: Option<SpecValue>,

    #[serde(default)]
    pub resource_state: ResourceState,

    #[serde(default)]
    pub drift_status: DriftStatus,

    /// Always within `[0.0, 1.0]`
    #[serde(default)]
    pub drift_score: f64,

    #[serde(default)]
    pub drift_details: SpecValue,

    #[serde(default)]
    pub last_drift_check: Option<DateTime<Utc>>,

    /// Last Git commit observed by the Git sync
    #[serde(default)]
    pub commit: Option<String>,

    /// Newest commit available upstream, when Git sync has seen one
    #[serde(default)]
    pub available_commit: Option<String>,

    /// When the resource was first observed by either sync source
    pub first_seen: DateTime<Utc>,

    /// When `resource_state` last changed
    pub state_changed_at: DateTime<Utc>,

    /// Incremented on every save; used to reject stale writes
    #[serde(default)]
    pub revision: u64,
}

impl Resource {
    /// Create a new draft resource
    pub fn new(fabric: impl Into<String>, key: ResourceKey) -> Self {
        let now = Utc::now();
        let fabric = fabric.into();
        Self {
            id: format!("{}:{}", fabric, key),
            fabric,
            key,
            desired_spec: None,
            actual_spec: None,
            resource_state: ResourceState::Draft,
            drift_status: DriftStatus::InSync,
            drift_score: 0.0,
            drift_details: SpecValue::Null,
            last_drift_check: None,
            commit: None,
            available_commit: None,
            first_seen: now,
            state_changed_at: now,
            revision: 0,
        }
    }

    /// Set the desired spec
    pub fn with_desired(mut self, spec: SpecValue) -> Self {
        self.desired_spec = Some(spec);
        self
    }

    /// Set the actual spec
    pub fn with_actual(mut self, spec: SpecValue) -> Self {
        self.actual_spec = Some(spec);
        self
    }

    /// Set the lifecycle state
    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.resource_state = state;
        self
    }

    /// Override when the resource was first seen
    pub fn with_first_seen(mut self, first_seen: DateTime<Utc>) -> Self {
        self.first_seen = first_seen;
        self
    }

    /// Whether Git tracks this resource
    pub fn is_git_tracked(&self) -> bool {
        self.desired_spec.is_some()
    }

    /// Whether the cluster reports this resource
    pub fn is_in_cluster(&self) -> bool {
        self.actual_spec.is_some()
    }

    /// When the cluster object was created
    ///
    /// Uses `metadata.creationTimestamp` from the actual spec and falls back to
    /// `first_seen` when it is missing or unparseable.
    pub fn creation_timestamp(&self) -> DateTime<Utc> {
        self.actual_spec
            .as_ref()
            .and_then(|spec| value::lookup_path(spec, "metadata.creationTimestamp"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(self.first_seen)
    }

    /// Display name including the fabric
    pub fn display_name(&self) -> String {
        format!("{}:{}", self.fabric, self.key)
    }
}
