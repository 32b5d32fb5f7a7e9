//! Fabric-level reconciliation
//!
//! [`FabricReconciler`] wires the stores and collaborators into the state machine, the alert
//! manager and the batch reconciler, and runs the periodic work: refreshing drift on every
//! resource, driving the lifecycle from what it finds, and raising alerts for findings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

use fabricsync_core::{
    AlertType, DriftStatus, ReconcilePolicy, ReconciliationAlert, Resource, ResourceState,
    Severity, Trigger,
};

use crate::alerts::{AlertDraft, AlertManager, AlertStatistics, ORPHANED_DURATION_KEY};
use crate::analyzer::{ConflictInfo, ConflictType, DriftAnalyzer, DriftReport};
use crate::batch::BatchReconciler;
use crate::dependencies::extract_dependency_keys;
use crate::error::Result;
use crate::orphans::{OrphanDetector, OrphanFinding};
use crate::remote::{ClusterCollaborator, GitCollaborator};
use crate::resolver::{ConflictResolver, ResolutionReport, ResolutionStrategy};
use crate::state_machine::{StateMachine, TransitionContext, TransitionOutcome};
use crate::store::{AlertStore, ResourceFilter, ResourceStore};

/// What refreshing one resource found and did
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    /// The resource as stored after the refresh
    pub resource: Resource,
    pub drift: DriftReport,
    pub conflicts: Vec<ConflictInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionOutcome>,
    /// Alerts created or updated by the refresh
    pub alerts: Vec<ReconciliationAlert>,
}

/// One orphan and the alert tracking it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanReport {
    pub finding: OrphanFinding,
    pub alert: ReconciliationAlert,
    /// False when an open alert was updated instead
    pub created: bool,
}

/// Result of a full fabric scan
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub fabric: String,
    pub refreshed: Vec<RefreshReport>,
    pub orphans: Vec<OrphanReport>,
    pub statistics: AlertStatistics,
}

impl ScanReport {
    pub fn drifted(&self) -> usize {
        self.refreshed.iter().filter(|r| !r.drift.is_in_sync()).count()
    }
}

/// Conflict resolution plan for one resource
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionPlan {
    pub resource: Resource,
    pub conflicts: Vec<ConflictInfo>,
    pub report: ResolutionReport,
    /// The desired spec with the plan applied
    pub merged_spec: Option<Value>,
}

/// Entry point for reconciling a fabric
pub struct FabricReconciler {
    resources: Arc<dyn ResourceStore>,
    state_machine: Arc<StateMachine>,
    alerts: Arc<AlertManager>,
    batches: Arc<BatchReconciler>,
    analyzer: DriftAnalyzer,
    policy: Arc<ReconcilePolicy>,
}

impl FabricReconciler {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        alerts: Arc<dyn AlertStore>,
        git: Arc<dyn GitCollaborator>,
        cluster: Arc<dyn ClusterCollaborator>,
        policy: Arc<ReconcilePolicy>,
    ) -> Self {
        let state_machine = Arc::new(StateMachine::new(
            resources.clone(),
            alerts.clone(),
            cluster,
            policy.clone(),
        ));
        let manager = Arc::new(AlertManager::new(
            alerts,
            resources.clone(),
            git,
            state_machine.clone(),
            policy.clone(),
        ));
        let batches = Arc::new(BatchReconciler::new(manager.clone(), policy.clone()));

        Self {
            resources,
            state_machine,
            alerts: manager,
            batches,
            analyzer: DriftAnalyzer::new(policy.clone()),
            policy,
        }
    }

    pub fn resources(&self) -> &Arc<dyn ResourceStore> {
        &self.resources
    }

    pub fn state_machine(&self) -> &Arc<StateMachine> {
        &self.state_machine
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn batches(&self) -> &Arc<BatchReconciler> {
        &self.batches
    }

    pub fn analyzer(&self) -> &DriftAnalyzer {
        &self.analyzer
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Resources referenced by `resource` that exist in the store
    async fn dependencies_of(&self, resource: &Resource) -> Result<Vec<Resource>> {
        let mut found = Vec::new();
        for key in extract_dependency_keys(resource, &self.policy) {
            if let Some(dep) = self.resources.find_by_key(&resource.fabric, &key).await? {
                found.push(dep);
            }
        }
        Ok(found)
    }

    /// Recompute drift and conflicts for a resource, follow the lifecycle and raise alerts
    pub async fn refresh_resource(
        &self,
        resource_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshReport> {
        let mut resource = self.resources.get(resource_id).await?;
        let drift = self.analyzer.apply_drift(&mut resource, now);
        let mut resource = self.resources.save(&resource).await?;

        let dependencies = self.dependencies_of(&resource).await?;
        let conflicts = self.analyzer.analyze_conflicts(&resource, &dependencies);

        let transition = match lifecycle_step(&resource, &drift, &self.policy, now) {
            Some((to, trigger)) => {
                let context = TransitionContext::new(format!("refresh: {}", drift.status)).at(now);
                let outcome = self
                    .state_machine
                    .execute_transition(&resource, to, trigger, &context, None)
                    .await?;
                if outcome.accepted {
                    resource = outcome.resource.clone();
                }
                Some(outcome)
            }
            None => None,
        };

        let mut raised = Vec::new();
        if let Some(alert) = transition.as_ref().and_then(|t| t.alert.clone()) {
            raised.push(alert);
        }
        for draft in self.findings(&resource, &drift, &conflicts) {
            if raised.iter().any(|a| a.alert_type == draft.alert_type) {
                continue;
            }
            raised.push(self.alerts.raise(draft, now).await?.into_alert());
        }

        tracing::debug!(
            resource = %resource.key,
            status = %drift.status,
            score = drift.score,
            conflicts = conflicts.len(),
            alerts = raised.len(),
            "refreshed resource"
        );

        Ok(RefreshReport {
            resource,
            drift,
            conflicts,
            transition,
            alerts: raised,
        })
    }

    /// Alert drafts for what a refresh found
    fn findings(
        &self,
        resource: &Resource,
        drift: &DriftReport,
        conflicts: &[ConflictInfo],
    ) -> Vec<AlertDraft> {
        let mut drafts = Vec::new();

        match drift.status {
            DriftStatus::SpecDrift => drafts.push(
                AlertDraft::for_resource(
                    resource,
                    AlertType::DriftDetected,
                    self.policy.drift_severity(drift.score),
                    "Configuration drift detected",
                    format!(
                        "{} differs between Git and the cluster (score {:.2})",
                        resource.key, drift.score
                    ),
                )
                .with_details(drift.details.clone()),
            ),
            DriftStatus::DesiredOnly
                if matches!(
                    resource.resource_state,
                    ResourceState::Synced | ResourceState::Drifted
                ) =>
            {
                drafts.push(
                    AlertDraft::for_resource(
                        resource,
                        AlertType::MissingFromCluster,
                        Severity::High,
                        "Resource missing from cluster",
                        format!("{} is tracked in Git but not running", resource.key),
                    )
                    .with_details(drift.details.clone()),
                )
            }
            _ => {}
        }

        for (conflict_type, alert_type, title) in [
            (ConflictType::Spec, AlertType::SpecConflict, "Critical spec conflict"),
            (
                ConflictType::Structural,
                AlertType::StructuralConflict,
                "Structural conflict",
            ),
            (
                ConflictType::Validation,
                AlertType::ValidationError,
                "Cluster validation error",
            ),
            (
                ConflictType::Dependency,
                AlertType::DependencyConflict,
                "Dependency out of sync",
            ),
        ] {
            let matching: Vec<&ConflictInfo> = conflicts
                .iter()
                .filter(|c| c.conflict_type == conflict_type)
                // non-critical spec conflicts are covered by the drift alert
                .filter(|c| conflict_type != ConflictType::Spec || c.is_blocking())
                .collect();
            let Some(severity) = matching.iter().map(|c| c.severity).max() else {
                continue;
            };
            let fields: Vec<&str> = matching.iter().map(|c| c.field_path.as_str()).collect();
            drafts.push(
                AlertDraft::for_resource(
                    resource,
                    alert_type,
                    severity,
                    title,
                    format!("{} on {}: {}", title, resource.key, fields.join(", ")),
                )
                .with_details(json!({ "fields": fields })),
            );
        }

        drafts
    }

    /// Find orphans in a fabric, raise or refresh their alerts and mark them orphaned
    ///
    /// Running this twice creates no new alerts; the second run only grows the recorded
    /// duration and escalates severity.
    pub async fn detect_orphans(
        &self,
        fabric: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrphanReport>> {
        let resources = self.resources.list(&ResourceFilter::fabric(fabric)).await?;
        let findings = OrphanDetector::new(&self.policy).detect_in(&resources, now);

        let mut reports = Vec::with_capacity(findings.len());
        for finding in findings {
            let Some(resource) = resources.iter().find(|r| r.id == finding.resource_id) else {
                continue;
            };

            if resource.resource_state != ResourceState::Orphaned
                && crate::state_machine::can_transition(
                    resource.resource_state,
                    ResourceState::Orphaned,
                    Trigger::OrphanDetected,
                )
            {
                let context = TransitionContext::new("orphan scan").at(now);
                self.state_machine
                    .execute_transition(
                        resource,
                        ResourceState::Orphaned,
                        Trigger::OrphanDetected,
                        &context,
                        None,
                    )
                    .await?;
            }

            let draft = AlertDraft::for_resource(
                resource,
                AlertType::OrphanedResource,
                finding.severity,
                "Orphaned resource",
                format!(
                    "{} exists in the cluster but not in Git (for {})",
                    finding.key,
                    humanize(finding.orphaned_secs())
                ),
            )
            .with_details(json!({
                ORPHANED_DURATION_KEY: finding.orphaned_secs(),
                "createdAt": finding.created_at.to_rfc3339(),
            }));
            let outcome = self.alerts.raise(draft, now).await?;
            reports.push(OrphanReport {
                created: outcome.is_created(),
                alert: outcome.into_alert(),
                finding,
            });
        }

        tracing::info!(fabric, orphans = reports.len(), "orphan scan finished");
        Ok(reports)
    }

    /// Refresh every resource of a fabric, then scan for orphans
    pub async fn scan_fabric(&self, fabric: &str, now: DateTime<Utc>) -> Result<ScanReport> {
        let resources = self.resources.list(&ResourceFilter::fabric(fabric)).await?;
        let mut refreshed = Vec::with_capacity(resources.len());
        for resource in &resources {
            refreshed.push(self.refresh_resource(&resource.id, now).await?);
        }
        let orphans = self.detect_orphans(fabric, now).await?;
        let statistics = self.alerts.statistics(fabric, now).await?;

        tracing::info!(
            fabric,
            resources = refreshed.len(),
            orphans = orphans.len(),
            open_alerts = statistics.open,
            "fabric scan finished"
        );
        Ok(ScanReport {
            fabric: fabric.to_string(),
            refreshed,
            orphans,
            statistics,
        })
    }

    /// Plan how to settle a resource's conflicts under `strategy`
    pub async fn plan_resolution(
        &self,
        resource_id: &str,
        strategy: ResolutionStrategy,
    ) -> Result<ResolutionPlan> {
        let resource = self.resources.get(resource_id).await?;
        let dependencies = self.dependencies_of(&resource).await?;
        let conflicts = self.analyzer.analyze_conflicts(&resource, &dependencies);

        let resolver = ConflictResolver::new();
        let report = resolver.resolve_conflicts(&conflicts, strategy);
        let merged_spec = resource
            .desired_spec
            .as_ref()
            .map(|desired| resolver.apply_to_spec(&report, desired));

        Ok(ResolutionPlan {
            resource,
            conflicts,
            report,
            merged_spec,
        })
    }
}

/// The lifecycle move a refresh should attempt, if any
fn lifecycle_step(
    resource: &Resource,
    drift: &DriftReport,
    policy: &ReconcilePolicy,
    now: DateTime<Utc>,
) -> Option<(ResourceState, Trigger)> {
    let only_in_cluster = resource.is_in_cluster() && !resource.is_git_tracked();
    let both = resource.is_in_cluster() && resource.is_git_tracked();

    match resource.resource_state {
        ResourceState::Draft | ResourceState::Synced | ResourceState::Drifted
            if only_in_cluster =>
        {
            Some((ResourceState::Orphaned, Trigger::OrphanDetected))
        }
        ResourceState::Synced if !drift.is_in_sync() => {
            Some((ResourceState::Drifted, Trigger::DriftDetected))
        }
        ResourceState::Drifted if drift.is_in_sync() => {
            Some((ResourceState::Synced, Trigger::DriftResolved))
        }
        ResourceState::Committed | ResourceState::Pending if both => {
            let to = if drift.is_in_sync() {
                ResourceState::Synced
            } else {
                ResourceState::Drifted
            };
            Some((to, Trigger::SyncCompleted))
        }
        ResourceState::Pending if now - resource.state_changed_at >= policy.sync_timeout() => {
            Some((ResourceState::Committed, Trigger::SyncTimeout))
        }
        _ => None,
    }
}

fn humanize(secs: i64) -> String {
    match secs {
        s if s >= 86_400 => format!("{}d", s / 86_400),
        s if s >= 3_600 => format!("{}h", s / 3_600),
        s if s >= 60 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}
