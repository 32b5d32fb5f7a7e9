//! Resource lifecycle states, transition triggers and the transition history record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CoreError;

/// Lifecycle state of a fabric resource
///
/// `Draft` is the only initial state. No state is terminal: every state has at least one
/// outgoing transition, so a resource can always be edited again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Edited but not yet committed to Git
    Draft,
    /// Committed to Git, not yet observed in the cluster
    Committed,
    /// Desired and actual state agree
    Synced,
    /// Desired and actual state diverge
    Drifted,
    /// A sync or deletion was handed to the cluster and has not settled yet
    Pending,
    /// Present in the cluster but not tracked in Git
    Orphaned,
}

impl ResourceState {
    /// Every state, in lifecycle order
    pub const ALL: [ResourceState; 6] = [
        ResourceState::Draft,
        ResourceState::Committed,
        ResourceState::Synced,
        ResourceState::Drifted,
        ResourceState::Pending,
        ResourceState::Orphaned,
    ];

    /// Human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Committed => "committed",
            Self::Synced => "synced",
            Self::Drifted => "drifted",
            Self::Pending => "pending",
            Self::Orphaned => "orphaned",
        }
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::Draft
    }
}

impl FromStr for ResourceState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownState {
                value: s.to_string(),
            })
    }
}

/// Event that requests a lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Draft committed to Git
    Commit,
    /// Draft reopened for editing
    Edit,
    /// Cluster sync finished and the cluster state was observed
    SyncCompleted,
    /// Drift recalculation found a divergence
    DriftDetected,
    /// Drift recalculation found agreement again
    DriftResolved,
    /// A new Git commit is available for a synced resource
    NewCommit,
    /// Operator-requested reconciliation towards the desired state
    Reconcile,
    /// A pending sync exceeded its timeout
    SyncTimeout,
    /// Orphan scan found the resource only in the cluster
    OrphanDetected,
    /// Cluster resource imported into Git
    Import,
    /// Resource adopted for editing as a new draft
    Adopt,
    /// Deletion from the cluster requested
    Delete,
}

impl Trigger {
    pub const ALL: [Trigger; 12] = [
        Trigger::Commit,
        Trigger::Edit,
        Trigger::SyncCompleted,
        Trigger::DriftDetected,
        Trigger::DriftResolved,
        Trigger::NewCommit,
        Trigger::Reconcile,
        Trigger::SyncTimeout,
        Trigger::OrphanDetected,
        Trigger::Import,
        Trigger::Adopt,
        Trigger::Delete,
    ];

    /// Human-readable trigger name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Edit => "edit",
            Self::SyncCompleted => "sync_completed",
            Self::DriftDetected => "drift_detected",
            Self::DriftResolved => "drift_resolved",
            Self::NewCommit => "new_commit",
            Self::Reconcile => "reconcile",
            Self::SyncTimeout => "sync_timeout",
            Self::OrphanDetected => "orphan_detected",
            Self::Import => "import",
            Self::Adopt => "adopt",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|trigger| trigger.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownTrigger {
                value: s.to_string(),
            })
    }
}

/// Immutable record of a committed state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionRecord {
    /// Resource the transition applied to
    pub resource_id: String,
    pub from: ResourceState,
    pub to: ResourceState,
    pub trigger: Trigger,
    /// Free-form reason supplied by the caller
    pub reason: String,
    /// User that requested the transition, if any
    #[serde(default)]
    pub user: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_str() {
        assert_eq!(
            "Drifted".parse::<ResourceState>().unwrap(),
            ResourceState::Drifted
        );
        assert!(matches!(
            "gone".parse::<ResourceState>(),
            Err(CoreError::UnknownState { .. })
        ));
    }

    #[test]
    fn test_trigger_from_str() {
        assert_eq!(
            "sync-completed".parse::<Trigger>().unwrap(),
            Trigger::SyncCompleted
        );
        assert!(matches!(
            "explode".parse::<Trigger>(),
            Err(CoreError::UnknownTrigger { .. })
        ));
    }

    #[test]
    fn test_state_serde_snake_case() {
        let json = serde_json::to_string(&ResourceState::Orphaned).unwrap();
        assert_eq!(json, "\"orphaned\"");
        let trigger = serde_json::to_string(&Trigger::SyncCompleted).unwrap();
        assert_eq!(trigger, "\"sync_completed\"");
    }
}
