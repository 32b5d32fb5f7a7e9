//! Reconciliation alerts and their lifecycle
//!
//! ```text
//! ACTIVE ──► ACKNOWLEDGED ──► RESOLVED (terminal)
//!   │             │
//!   └─────────────┴──► SUPPRESSED
//! ```
//!
//! Suppression blocks further suppression of the same alert, but a later detection cycle
//! may raise a brand-new alert for the same resource.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;

use crate::error::CoreError;
use crate::policy::ReconcilePolicy;
use crate::resource::ResourceKey;

/// Severity of a finding or alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of finding an alert was raised for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    OrphanedResource,
    DriftDetected,
    MissingFromCluster,
    SpecConflict,
    StructuralConflict,
    ValidationError,
    DependencyConflict,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrphanedResource => "orphaned_resource",
            Self::DriftDetected => "drift_detected",
            Self::MissingFromCluster => "missing_from_cluster",
            Self::SpecConflict => "spec_conflict",
            Self::StructuralConflict => "structural_conflict",
            Self::ValidationError => "validation_error",
            Self::DependencyConflict => "dependency_conflict",
        }
    }

    /// Resolution actions offered for this alert type, most preferred first
    pub fn suggested_actions(&self) -> &'static [ResolutionAction] {
        use ResolutionAction::*;
        match self {
            Self::OrphanedResource => &[ImportToGit, DeleteFromCluster, Ignore],
            Self::DriftDetected => &[UpdateGit, ImportToGit, Ignore],
            Self::MissingFromCluster => &[SyncToCluster, ManualReview, Ignore],
            Self::SpecConflict => &[ManualReview, UpdateGit, SyncToCluster, Ignore],
            Self::StructuralConflict => &[ManualReview, Ignore],
            Self::ValidationError => &[ManualReview, UpdateGit, Ignore],
            Self::DependencyConflict => &[ManualReview, Ignore],
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Suppressed,
}

impl AlertStatus {
    /// Active and acknowledged alerts still need attention
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::Acknowledged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Suppressed => "suppressed",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fixed set of resolution actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Import the cluster resource into Git
    ImportToGit,
    /// Delete the resource from the cluster
    DeleteFromCluster,
    /// Rewrite the Git spec to match the cluster
    UpdateGit,
    /// Apply the Git spec to the cluster
    SyncToCluster,
    /// Accept the divergence
    Ignore,
    /// Hand off to a human
    ManualReview,
}

impl ResolutionAction {
    pub const ALL: [ResolutionAction; 6] = [
        ResolutionAction::ImportToGit,
        ResolutionAction::DeleteFromCluster,
        ResolutionAction::UpdateGit,
        ResolutionAction::SyncToCluster,
        ResolutionAction::Ignore,
        ResolutionAction::ManualReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImportToGit => "import_to_git",
            Self::DeleteFromCluster => "delete_from_cluster",
            Self::UpdateGit => "update_git",
            Self::SyncToCluster => "sync_to_cluster",
            Self::Ignore => "ignore",
            Self::ManualReview => "manual_review",
        }
    }

    /// Whether running the action changes Git or the cluster
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Ignore | Self::ManualReview)
    }
}

impl std::fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResolutionAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownAction {
                value: s.to_string(),
            })
    }
}

/// Rejected alert lifecycle operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertLifecycleError {
    #[error("alert is {status}, only active alerts can be acknowledged")]
    NotActive { status: AlertStatus },

    #[error("alert already resolved")]
    AlreadyResolved,

    #[error("alert already suppressed")]
    AlreadySuppressed,
}

/// A persisted reconciliation alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationAlert {
    pub id: String,
    pub fabric: String,
    /// Owning resource
    pub resource_id: String,
    pub resource_key: ResourceKey,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    pub suggested_action: ResolutionAction,
    #[serde(default)]
    pub resolved_action: Option<ResolutionAction>,
    /// Audit payload for resolution and suppression
    #[serde(default)]
    pub resolution_metadata: Map<String, Value>,
    /// Finding context (conflicts, drift details, orphan duration)
    #[serde(default)]
    pub drift_details: Value,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    /// Lower is more urgent
    pub queue_priority: i64,
    #[serde(default)]
    pub processing_attempts: u32,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub related_alerts: Vec<String>,
}

impl ReconciliationAlert {
    /// Create an active alert; `expires_at` lies strictly after `created`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fabric: impl Into<String>,
        resource_id: impl Into<String>,
        resource_key: ResourceKey,
        alert_type: AlertType,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        policy: &ReconcilePolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = policy.alert_ttl().max(Duration::seconds(1));
        let suggested_action = alert_type
            .suggested_actions()
            .first()
            .copied()
            .unwrap_or(ResolutionAction::ManualReview);

        Self {
            id: generate_alert_id(),
            fabric: fabric.into(),
            resource_id: resource_id.into(),
            resource_key,
            alert_type,
            severity,
            status: AlertStatus::Active,
            title: title.into(),
            message: message.into(),
            suggested_action,
            resolved_action: None,
            resolution_metadata: Map::new(),
            drift_details: Value::Null,
            created: now,
            acknowledged_at: None,
            resolved_at: None,
            expires_at: now + ttl,
            queue_priority: policy.queue_priority(severity, 0),
            processing_attempts: 0,
            batch_id: None,
            related_alerts: Vec::new(),
        }
    }

    /// Attach finding context
    pub fn with_details(mut self, details: Value) -> Self {
        self.drift_details = details;
        self
    }

    /// Whole hours since creation (never negative)
    pub fn age_hours(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created).num_hours().max(0)
    }

    /// Recompute the derived queue priority
    pub fn refresh_priority(&mut self, policy: &ReconcilePolicy, now: DateTime<Utc>) {
        self.queue_priority = policy.queue_priority(self.severity, self.age_hours(now));
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// ACTIVE → ACKNOWLEDGED
    pub fn acknowledge(
        &mut self,
        user: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), AlertLifecycleError> {
        if self.status != AlertStatus::Active {
            return Err(AlertLifecycleError::NotActive {
                status: self.status,
            });
        }
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_at = Some(now);
        if let Some(user) = user {
            self.resolution_metadata
                .insert("acknowledged_by".to_string(), Value::from(user));
        }
        Ok(())
    }

    /// Any non-resolved state → RESOLVED
    pub fn resolve(
        &mut self,
        action: ResolutionAction,
        user: Option<&str>,
        metadata: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), AlertLifecycleError> {
        if self.status == AlertStatus::Resolved {
            return Err(AlertLifecycleError::AlreadyResolved);
        }
        self.status = AlertStatus::Resolved;
        self.resolved_action = Some(action);
        self.resolved_at = Some(now);
        self.resolution_metadata.extend(metadata);
        self.resolution_metadata
            .insert("action".to_string(), Value::from(action.as_str()));
        if let Some(user) = user {
            self.resolution_metadata
                .insert("resolved_by".to_string(), Value::from(user));
        }
        Ok(())
    }

    /// ACTIVE/ACKNOWLEDGED → SUPPRESSED
    pub fn suppress(
        &mut self,
        reason: &str,
        user: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), AlertLifecycleError> {
        match self.status {
            AlertStatus::Resolved => return Err(AlertLifecycleError::AlreadyResolved),
            AlertStatus::Suppressed => return Err(AlertLifecycleError::AlreadySuppressed),
            AlertStatus::Active | AlertStatus::Acknowledged => {}
        }
        self.status = AlertStatus::Suppressed;
        self.resolution_metadata
            .insert("suppressed_reason".to_string(), Value::from(reason));
        self.resolution_metadata
            .insert("suppressed_at".to_string(), Value::from(now.to_rfc3339()));
        if let Some(user) = user {
            self.resolution_metadata
                .insert("suppressed_by".to_string(), Value::from(user));
        }
        Ok(())
    }
}

fn generate_alert_id() -> String {
    format!("alert-{:016x}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_alert(severity: Severity, created: DateTime<Utc>) -> ReconciliationAlert {
        ReconciliationAlert::new(
            "fab",
            "fab:default/VPC/vpc-1",
            ResourceKey::new("default", "VPC", "vpc-1"),
            AlertType::DriftDetected,
            severity,
            "Drift detected",
            "subnet differs",
            &ReconcilePolicy::default(),
            created,
        )
    }

    #[test]
    fn test_new_alert_defaults() {
        let now = Utc::now();
        let alert = test_alert(Severity::High, now);
        assert_eq!(alert.status, AlertStatus::Active);
        assert!(alert.expires_at > alert.created);
        assert_eq!(alert.queue_priority, 30);
        assert_eq!(alert.suggested_action, ResolutionAction::UpdateGit);
        assert!(alert.id.starts_with("alert-"));
    }

    #[test]
    fn test_priority_after_five_hours() {
        let now = Utc::now();
        let mut alert = test_alert(Severity::Critical, now - Duration::hours(5));
        alert.refresh_priority(&ReconcilePolicy::default(), now);
        assert_eq!(alert.queue_priority, 5);
    }

    #[test]
    fn test_acknowledge_requires_active() {
        let now = Utc::now();
        let mut alert = test_alert(Severity::Low, now);
        alert.acknowledge(Some("ops"), now).unwrap();
        assert_eq!(alert.status, AlertStatus::Acknowledged);
        assert!(alert.acknowledged_at.is_some());

        let err = alert.acknowledge(Some("ops"), now).unwrap_err();
        assert_eq!(
            err,
            AlertLifecycleError::NotActive {
                status: AlertStatus::Acknowledged
            }
        );
    }

    #[test]
    fn test_resolve_twice_fails() {
        let now = Utc::now();
        let mut alert = test_alert(Severity::Medium, now);
        alert
            .resolve(ResolutionAction::Ignore, Some("ops"), Map::new(), now)
            .unwrap();
        let snapshot = alert.clone();

        let err = alert
            .resolve(ResolutionAction::UpdateGit, None, Map::new(), now)
            .unwrap_err();
        assert_eq!(err, AlertLifecycleError::AlreadyResolved);
        assert_eq!(err.to_string(), "alert already resolved");
        assert_eq!(alert, snapshot);
    }

    #[test]
    fn test_suppress_rules() {
        let now = Utc::now();
        let mut alert = test_alert(Severity::Medium, now);
        alert.suppress("known issue", Some("ops"), now).unwrap();
        assert_eq!(alert.status, AlertStatus::Suppressed);
        assert_eq!(
            alert.suppress("again", None, now),
            Err(AlertLifecycleError::AlreadySuppressed)
        );

        let mut resolved = test_alert(Severity::Medium, now);
        resolved
            .resolve(ResolutionAction::Ignore, None, Map::new(), now)
            .unwrap();
        assert_eq!(
            resolved.suppress("late", None, now),
            Err(AlertLifecycleError::AlreadyResolved)
        );
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!(
            "import-to-git".parse::<ResolutionAction>().unwrap(),
            ResolutionAction::ImportToGit
        );
        assert_eq!(
            "MANUAL_REVIEW".parse::<ResolutionAction>().unwrap(),
            ResolutionAction::ManualReview
        );
        assert!(matches!(
            "reboot".parse::<ResolutionAction>(),
            Err(CoreError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_suggested_actions_are_deterministic() {
        assert_eq!(
            AlertType::OrphanedResource.suggested_actions(),
            &[
                ResolutionAction::ImportToGit,
                ResolutionAction::DeleteFromCluster,
                ResolutionAction::Ignore
            ]
        );
        assert_eq!(
            AlertType::DriftDetected.suggested_actions(),
            &[
                ResolutionAction::UpdateGit,
                ResolutionAction::ImportToGit,
                ResolutionAction::Ignore
            ]
        );
    }
}
