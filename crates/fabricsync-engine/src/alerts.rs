//! Alert creation, lifecycle and resolution actions
//!
//! Alerts are deduplicated at creation: while a resource has an open alert of a given type,
//! new findings of that type update the existing alert instead of creating another one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use fabricsync_core::{
    AlertType, ReconcilePolicy, ReconciliationAlert, ResolutionAction, Resource, ResourceState,
    Severity, Trigger, value,
};

use crate::analyzer::DriftAnalyzer;
use crate::error::{EngineError, Result};
use crate::remote::GitCollaborator;
use crate::state_machine::{StateMachine, TransitionContext, can_transition};
use crate::store::{AlertFilter, AlertStore, ResourceStore};

/// Detail key holding how long a resource has been orphaned; only ever grows on update
pub const ORPHANED_DURATION_KEY: &str = "orphanedDurationSeconds";

/// A finding about to become an alert
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub fabric: String,
    pub resource_id: String,
    pub resource_key: fabricsync_core::ResourceKey,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub details: Value,
}

impl AlertDraft {
    pub fn for_resource(
        resource: &Resource,
        alert_type: AlertType,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            fabric: resource.fabric.clone(),
            resource_id: resource.id.clone(),
            resource_key: resource.key.clone(),
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Whether raising a finding created a new alert or refreshed an open one
#[derive(Debug, Clone)]
pub enum RaiseOutcome {
    Created(ReconciliationAlert),
    Updated(ReconciliationAlert),
}

impl RaiseOutcome {
    pub fn alert(&self) -> &ReconciliationAlert {
        match self {
            Self::Created(alert) | Self::Updated(alert) => alert,
        }
    }

    pub fn into_alert(self) -> ReconciliationAlert {
        match self {
            Self::Created(alert) | Self::Updated(alert) => alert,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Create an alert unless an open one of the same type already exists for the resource
///
/// An existing alert keeps its id and creation time. Its severity only escalates and its
/// orphaned duration only grows.
pub async fn raise_deduplicated(
    store: &dyn AlertStore,
    policy: &ReconcilePolicy,
    draft: AlertDraft,
    now: DateTime<Utc>,
) -> Result<RaiseOutcome> {
    if let Some(mut existing) = store
        .find_open(&draft.fabric, &draft.resource_key, draft.alert_type)
        .await?
    {
        existing.severity = existing.severity.max(draft.severity);
        existing.title = draft.title;
        existing.message = draft.message;
        existing.drift_details = merge_details(&existing.drift_details, draft.details);
        existing.refresh_priority(policy, now);
        store.update(&existing).await?;

        tracing::debug!(
            alert = %existing.id,
            resource = %existing.resource_key,
            alert_type = %existing.alert_type,
            "updated existing alert"
        );
        return Ok(RaiseOutcome::Updated(existing));
    }

    let alert = ReconciliationAlert::new(
        draft.fabric,
        draft.resource_id,
        draft.resource_key,
        draft.alert_type,
        draft.severity,
        draft.title,
        draft.message,
        policy,
        now,
    )
    .with_details(draft.details);
    store.create(&alert).await?;

    tracing::info!(
        alert = %alert.id,
        resource = %alert.resource_key,
        alert_type = %alert.alert_type,
        severity = %alert.severity,
        "raised alert"
    );
    Ok(RaiseOutcome::Created(alert))
}

fn merge_details(existing: &Value, mut incoming: Value) -> Value {
    let previous = existing.get(ORPHANED_DURATION_KEY).and_then(Value::as_i64);
    if let (Some(previous), Some(map)) = (previous, incoming.as_object_mut()) {
        let current = map
            .get(ORPHANED_DURATION_KEY)
            .and_then(Value::as_i64)
            .unwrap_or(previous);
        map.insert(
            ORPHANED_DURATION_KEY.to_string(),
            Value::from(current.max(previous)),
        );
    }
    incoming
}

/// Result of running a resolution action
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action: ResolutionAction,
    pub success: bool,
    pub message: String,
    pub details: Map<String, Value>,
    /// Nothing was changed; the result describes what would have happened
    pub dry_run: bool,
    /// A critical conflict blocked the action
    pub requires_manual_review: bool,
}

impl ActionResult {
    fn succeeded(action: ResolutionAction, message: String, details: Map<String, Value>) -> Self {
        Self {
            action,
            success: true,
            message,
            details,
            dry_run: false,
            requires_manual_review: false,
        }
    }

    fn failed(action: ResolutionAction, error: &EngineError) -> Self {
        Self {
            action,
            success: false,
            message: error.to_string(),
            details: Map::new(),
            dry_run: false,
            requires_manual_review: error.requires_manual_review(),
        }
    }
}

/// Alert counts for a fabric
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatistics {
    pub total: usize,
    pub open: usize,
    pub expired: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
}

/// Owns the alert lifecycle and dispatches resolution actions
pub struct AlertManager {
    alerts: Arc<dyn AlertStore>,
    resources: Arc<dyn ResourceStore>,
    git: Arc<dyn GitCollaborator>,
    state_machine: Arc<StateMachine>,
    analyzer: DriftAnalyzer,
    policy: Arc<ReconcilePolicy>,
}

impl AlertManager {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        resources: Arc<dyn ResourceStore>,
        git: Arc<dyn GitCollaborator>,
        state_machine: Arc<StateMachine>,
        policy: Arc<ReconcilePolicy>,
    ) -> Self {
        Self {
            alerts,
            resources,
            git,
            state_machine,
            analyzer: DriftAnalyzer::new(policy.clone()),
            policy,
        }
    }

    /// Raise a finding, reusing an open alert of the same type
    pub async fn raise(&self, draft: AlertDraft, now: DateTime<Utc>) -> Result<RaiseOutcome> {
        raise_deduplicated(self.alerts.as_ref(), &self.policy, draft, now).await
    }

    pub async fn get(&self, alert_id: &str) -> Result<ReconciliationAlert> {
        self.alerts.get(alert_id).await
    }

    /// Persist an alert, recomputing its queue priority
    pub async fn save(
        &self,
        alert: &mut ReconciliationAlert,
        now: DateTime<Utc>,
    ) -> Result<()> {
        alert.refresh_priority(&self.policy, now);
        self.alerts.update(alert).await
    }

    pub async fn acknowledge(
        &self,
        alert_id: &str,
        user: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationAlert> {
        let mut alert = self.alerts.get(alert_id).await?;
        alert.acknowledge(user, now)?;
        self.save(&mut alert, now).await?;
        Ok(alert)
    }

    pub async fn resolve(
        &self,
        alert_id: &str,
        action: ResolutionAction,
        user: Option<&str>,
        metadata: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationAlert> {
        let mut alert = self.alerts.get(alert_id).await?;
        alert.resolve(action, user, metadata, now)?;
        self.save(&mut alert, now).await?;
        tracing::info!(alert = %alert.id, %action, "resolved alert");
        Ok(alert)
    }

    pub async fn suppress(
        &self,
        alert_id: &str,
        reason: &str,
        user: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationAlert> {
        let mut alert = self.alerts.get(alert_id).await?;
        alert.suppress(reason, user, now)?;
        self.save(&mut alert, now).await?;
        tracing::info!(alert = %alert.id, reason, "suppressed alert");
        Ok(alert)
    }

    /// Actions offered for an alert, most preferred first
    pub fn get_suggested_actions(&self, alert: &ReconciliationAlert) -> Vec<ResolutionAction> {
        alert.alert_type.suggested_actions().to_vec()
    }

    /// The most urgent open alert of a resource
    pub async fn find_open_for_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ReconciliationAlert>> {
        let filter = AlertFilter::all().with_resource(resource_id).open_only();
        let mut alerts = self.alerts.query(&filter).await?;
        alerts.sort_by(|a, b| {
            (a.queue_priority, b.severity, a.created).cmp(&(
                b.queue_priority,
                a.severity,
                b.created,
            ))
        });
        Ok(alerts.into_iter().next())
    }

    /// Open alerts of a fabric, most urgent first
    pub async fn queue(
        &self,
        fabric: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReconciliationAlert>> {
        let mut alerts = self
            .alerts
            .query(&AlertFilter::fabric(fabric).open_only())
            .await?;
        for alert in &mut alerts {
            alert.refresh_priority(&self.policy, now);
        }
        alerts.sort_by(|a, b| (a.queue_priority, a.created).cmp(&(b.queue_priority, b.created)));
        Ok(alerts)
    }

    pub async fn statistics(&self, fabric: &str, now: DateTime<Utc>) -> Result<AlertStatistics> {
        let alerts = self.alerts.query(&AlertFilter::fabric(fabric)).await?;
        let mut stats = AlertStatistics {
            total: alerts.len(),
            ..Default::default()
        };
        for alert in &alerts {
            if alert.is_open() {
                stats.open += 1;
            }
            if alert.is_expired(now) {
                stats.expired += 1;
            }
            *stats.by_status.entry(alert.status.to_string()).or_default() += 1;
            *stats.by_severity.entry(alert.severity.to_string()).or_default() += 1;
            *stats.by_type.entry(alert.alert_type.to_string()).or_default() += 1;
        }
        Ok(stats)
    }

    /// Run a resolution action for an alert
    ///
    /// A successful real run resolves the alert with the handler's details as resolution
    /// metadata. A dry run checks preconditions and reports what would happen without
    /// touching the alert, the resource or any collaborator.
    pub async fn execute_resolution_action(
        &self,
        alert_id: &str,
        action: ResolutionAction,
        user: Option<&str>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<ActionResult> {
        let mut alert = self.alerts.get(alert_id).await?;
        if !alert.is_open() {
            return Err(EngineError::Validation(format!(
                "alert '{}' is {} and cannot be actioned",
                alert.id, alert.status
            )));
        }
        let resource = self.resources.get(&alert.resource_id).await?;

        if dry_run {
            return Ok(self.dry_run(action, &resource));
        }

        alert.processing_attempts += 1;
        let result = match self.run_handler(action, &resource, user, now).await {
            Ok(result) => {
                let mut metadata = result.details.clone();
                metadata.insert("message".to_string(), Value::from(result.message.clone()));
                alert.resolve(action, user, metadata, now)?;
                result
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(alert = %alert.id, %action, error = %e, "resolution action failed");
                ActionResult::failed(action, &e)
            }
        };
        self.save(&mut alert, now).await?;
        Ok(result)
    }

    /// Run an action for a resource, through its most urgent open alert when it has one
    pub async fn execute_action_for_resource(
        &self,
        resource_id: &str,
        action: ResolutionAction,
        user: Option<&str>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<ActionResult> {
        if let Some(alert) = self.find_open_for_resource(resource_id).await? {
            return self
                .execute_resolution_action(&alert.id, action, user, dry_run, now)
                .await;
        }

        let resource = self.resources.get(resource_id).await?;
        if dry_run {
            return Ok(self.dry_run(action, &resource));
        }
        match self.run_handler(action, &resource, user, now).await {
            Ok(result) => Ok(result),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => Ok(ActionResult::failed(action, &e)),
        }
    }

    fn dry_run(&self, action: ResolutionAction, resource: &Resource) -> ActionResult {
        let (success, message) = match self.check_preconditions(action, resource) {
            Ok(()) => (true, format!("[dry-run] would run {} on {}", action, resource.key)),
            Err(e) => (
                false,
                format!("[dry-run] {} on {} would fail: {}", action, resource.key, e),
            ),
        };
        let mut details = Map::new();
        details.insert("resource".to_string(), Value::from(resource.key.to_string()));
        details.insert("state".to_string(), Value::from(resource.resource_state.as_str()));
        ActionResult {
            action,
            success,
            message,
            details,
            dry_run: true,
            requires_manual_review: false,
        }
    }

    fn check_preconditions(&self, action: ResolutionAction, resource: &Resource) -> Result<()> {
        match action {
            ResolutionAction::ImportToGit | ResolutionAction::UpdateGit
                if !resource.is_in_cluster() =>
            {
                Err(EngineError::Validation(format!(
                    "{} has no cluster spec",
                    resource.key
                )))
            }
            ResolutionAction::SyncToCluster if !resource.is_git_tracked() => Err(
                EngineError::Validation(format!("{} has no desired spec", resource.key)),
            ),
            ResolutionAction::SyncToCluster
                if !can_transition(
                    resource.resource_state,
                    ResourceState::Pending,
                    Trigger::Reconcile,
                ) =>
            {
                Err(EngineError::Validation(format!(
                    "{} cannot be synced from state {}",
                    resource.key, resource.resource_state
                )))
            }
            ResolutionAction::DeleteFromCluster
                if !can_transition(
                    resource.resource_state,
                    ResourceState::Pending,
                    Trigger::Delete,
                ) =>
            {
                Err(EngineError::Validation(format!(
                    "{} cannot be deleted from state {}",
                    resource.key, resource.resource_state
                )))
            }
            ResolutionAction::UpdateGit | ResolutionAction::SyncToCluster => {
                self.ensure_no_blocking_conflict(resource)
            }
            _ => Ok(()),
        }
    }

    fn ensure_no_blocking_conflict(&self, resource: &Resource) -> Result<()> {
        match self
            .analyzer
            .analyze_conflicts(resource, &[])
            .into_iter()
            .find(|c| c.is_blocking())
        {
            Some(conflict) => Err(EngineError::Conflict {
                message: format!(
                    "{} differs between Git and the cluster",
                    conflict.field_path
                ),
                field_path: conflict.field_path,
            }),
            None => Ok(()),
        }
    }

    async fn run_handler(
        &self,
        action: ResolutionAction,
        resource: &Resource,
        user: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ActionResult> {
        self.check_preconditions(action, resource)?;

        match action {
            ResolutionAction::ImportToGit => {
                let outcome = self.git.import_resource(resource).await.into_result("git")?;
                let mut details = outcome.details;
                details.insert("resource".to_string(), Value::from(resource.key.to_string()));
                Ok(ActionResult::succeeded(
                    action,
                    format!("imported {} into Git", resource.key),
                    details,
                ))
            }
            ResolutionAction::UpdateGit => {
                let spec = self.cluster_spec_for_git(resource);
                let outcome = self
                    .git
                    .update_spec(resource, &spec)
                    .await
                    .into_result("git")?;
                let mut details = outcome.details;
                details.insert("spec".to_string(), spec);
                Ok(ActionResult::succeeded(
                    action,
                    format!("updated Git spec of {} from the cluster", resource.key),
                    details,
                ))
            }
            ResolutionAction::SyncToCluster => {
                self.transition(resource, Trigger::Reconcile, "sync to cluster", user, now)
                    .await?;
                Ok(ActionResult::succeeded(
                    action,
                    format!("requested cluster sync of {}", resource.key),
                    detail_map(json!({"resource": resource.key.to_string()})),
                ))
            }
            ResolutionAction::DeleteFromCluster => {
                self.transition(resource, Trigger::Delete, "delete from cluster", user, now)
                    .await?;
                Ok(ActionResult::succeeded(
                    action,
                    format!("requested deletion of {} from the cluster", resource.key),
                    detail_map(json!({"resource": resource.key.to_string()})),
                ))
            }
            ResolutionAction::Ignore => Ok(ActionResult::succeeded(
                action,
                format!("ignored divergence on {}", resource.key),
                Map::new(),
            )),
            ResolutionAction::ManualReview => Ok(ActionResult::succeeded(
                action,
                format!("{} handed off for manual review", resource.key),
                detail_map(json!({"reviewer": user})),
            )),
        }
    }

    /// Move the resource to PENDING through the state machine
    async fn transition(
        &self,
        resource: &Resource,
        trigger: Trigger,
        reason: &str,
        user: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut context = TransitionContext::new(reason).at(now);
        context.approved_by = user.map(String::from);

        let outcome = self
            .state_machine
            .execute_transition(resource, ResourceState::Pending, trigger, &context, user)
            .await?;
        match outcome.rejection {
            None => Ok(()),
            Some(rejection) => Err(EngineError::Validation(rejection.message)),
        }
    }

    /// The cluster spec without cluster-owned fields
    fn cluster_spec_for_git(&self, resource: &Resource) -> Value {
        match &resource.actual_spec {
            Some(Value::Object(map)) => Value::Object(
                map.iter()
                    .filter(|(k, _)| !self.policy.ignored_fields.contains(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            Some(other) => other.clone(),
            None => Value::Null,
        }
    }
}

/// Store failures abort the caller instead of becoming an unsuccessful action
fn is_fatal(error: &EngineError) -> bool {
    matches!(
        error,
        EngineError::Storage(_) | EngineError::ResourceNotFound(_) | EngineError::AlertNotFound(_)
    )
}

fn detail_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Orphaned duration recorded on an alert, in seconds
pub fn orphaned_duration_secs(alert: &ReconciliationAlert) -> Option<i64> {
    value::lookup_path(&alert.drift_details, ORPHANED_DURATION_KEY).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RecordingCluster, RecordingGit};
    use crate::store::{MemoryAlertStore, MemoryResourceStore};
    use chrono::Duration;
    use fabricsync_core::{AlertStatus, ResourceKey};

    struct Harness {
        resources: Arc<MemoryResourceStore>,
        alerts: Arc<MemoryAlertStore>,
        git: Arc<RecordingGit>,
        cluster: Arc<RecordingCluster>,
        manager: AlertManager,
    }

    fn harness() -> Harness {
        let policy = Arc::new(ReconcilePolicy::default());
        let resources = Arc::new(MemoryResourceStore::new());
        let alerts = Arc::new(MemoryAlertStore::new());
        let git = Arc::new(RecordingGit::new());
        let cluster = Arc::new(RecordingCluster::new());
        let state_machine = Arc::new(StateMachine::new(
            resources.clone(),
            alerts.clone(),
            cluster.clone(),
            policy.clone(),
        ));
        let manager = AlertManager::new(
            alerts.clone(),
            resources.clone(),
            git.clone(),
            state_machine,
            policy,
        );
        Harness {
            resources,
            alerts,
            git,
            cluster,
            manager,
        }
    }

    async fn orphan(h: &Harness) -> Resource {
        let resource = Resource::new("fab", ResourceKey::new("default", "VPC", "orphan"))
            .with_state(ResourceState::Orphaned)
            .with_actual(json!({"subnet": "10.0.0.0/16"}));
        h.resources.save(&resource).await.unwrap()
    }

    fn draft(resource: &Resource, severity: Severity, secs: i64) -> AlertDraft {
        AlertDraft::for_resource(
            resource,
            AlertType::OrphanedResource,
            severity,
            "Orphaned resource",
            "only in cluster",
        )
        .with_details(json!({ ORPHANED_DURATION_KEY: secs }))
    }

    #[tokio::test]
    async fn test_raise_deduplicates_and_escalates() {
        let h = harness();
        let resource = orphan(&h).await;
        let now = Utc::now();

        let first = h.manager.raise(draft(&resource, Severity::High, 7200), now).await.unwrap();
        assert!(first.is_created());

        let second = h
            .manager
            .raise(draft(&resource, Severity::Medium, 3600), now)
            .await
            .unwrap();
        assert!(!second.is_created());
        assert_eq!(second.alert().id, first.alert().id);
        assert_eq!(second.alert().severity, Severity::High);
        assert_eq!(orphaned_duration_secs(second.alert()), Some(7200));
        assert_eq!(h.alerts.all_alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_new_alert_after_resolution() {
        let h = harness();
        let resource = orphan(&h).await;
        let now = Utc::now();

        let first = h.manager.raise(draft(&resource, Severity::Low, 10), now).await.unwrap();
        h.manager
            .resolve(&first.alert().id, ResolutionAction::Ignore, None, Map::new(), now)
            .await
            .unwrap();

        let second = h.manager.raise(draft(&resource, Severity::Low, 20), now).await.unwrap();
        assert!(second.is_created());
        assert_ne!(second.alert().id, first.alert().id);
    }

    #[tokio::test]
    async fn test_resolve_twice_fails_and_keeps_state() {
        let h = harness();
        let resource = orphan(&h).await;
        let now = Utc::now();
        let alert = h
            .manager
            .raise(draft(&resource, Severity::Low, 10), now)
            .await
            .unwrap()
            .into_alert();

        h.manager
            .resolve(&alert.id, ResolutionAction::Ignore, Some("ops"), Map::new(), now)
            .await
            .unwrap();
        let resolved = h.manager.get(&alert.id).await.unwrap();

        let err = h
            .manager
            .resolve(&alert.id, ResolutionAction::UpdateGit, None, Map::new(), now)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already resolved"));
        assert_eq!(h.manager.get(&alert.id).await.unwrap(), resolved);
    }

    #[tokio::test]
    async fn test_acknowledge_then_suppress() {
        let h = harness();
        let resource = orphan(&h).await;
        let now = Utc::now();
        let alert = h
            .manager
            .raise(draft(&resource, Severity::Low, 10), now)
            .await
            .unwrap()
            .into_alert();

        h.manager.acknowledge(&alert.id, Some("ops"), now).await.unwrap();
        assert!(h.manager.acknowledge(&alert.id, Some("ops"), now).await.is_err());

        let suppressed = h
            .manager
            .suppress(&alert.id, "expected during migration", Some("ops"), now)
            .await
            .unwrap();
        assert_eq!(suppressed.status, AlertStatus::Suppressed);
        assert_eq!(
            suppressed.resolution_metadata["suppressed_reason"],
            "expected during migration"
        );
    }

    #[tokio::test]
    async fn test_dry_run_never_mutates() {
        let h = harness();
        let resource = orphan(&h).await;
        let now = Utc::now();
        let alert = h
            .manager
            .raise(draft(&resource, Severity::High, 10), now)
            .await
            .unwrap()
            .into_alert();

        let result = h
            .manager
            .execute_resolution_action(&alert.id, ResolutionAction::ImportToGit, None, true, now)
            .await
            .unwrap();
        assert!(result.dry_run);
        assert!(result.success);
        assert!(result.message.starts_with("[dry-run]"));
        assert!(h.git.calls().is_empty());
        assert_eq!(h.manager.get(&alert.id).await.unwrap(), alert);
    }

    #[tokio::test]
    async fn test_import_resolves_alert() {
        let h = harness();
        let resource = orphan(&h).await;
        let now = Utc::now();
        let alert = h
            .manager
            .raise(draft(&resource, Severity::High, 10), now)
            .await
            .unwrap()
            .into_alert();

        let result = h
            .manager
            .execute_resolution_action(
                &alert.id,
                ResolutionAction::ImportToGit,
                Some("ops"),
                false,
                now,
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(!result.dry_run);

        let stored = h.manager.get(&alert.id).await.unwrap();
        assert_eq!(stored.status, AlertStatus::Resolved);
        assert_eq!(stored.resolved_action, Some(ResolutionAction::ImportToGit));
        assert_eq!(stored.processing_attempts, 1);
        assert_eq!(stored.resolution_metadata["resource"], "default/VPC/orphan");
        assert_eq!(h.git.calls()[0].operation, "import_resource");
    }

    #[tokio::test]
    async fn test_failed_action_keeps_alert_open() {
        let h = harness();
        let resource = orphan(&h).await;
        h.git.fail_on(resource.key.clone());
        let now = Utc::now();
        let alert = h
            .manager
            .raise(draft(&resource, Severity::High, 10), now)
            .await
            .unwrap()
            .into_alert();

        let result = h
            .manager
            .execute_resolution_action(&alert.id, ResolutionAction::ImportToGit, None, false, now)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.message.contains("git call failed"));

        let stored = h.manager.get(&alert.id).await.unwrap();
        assert_eq!(stored.status, AlertStatus::Active);
        assert_eq!(stored.processing_attempts, 1);
    }

    #[tokio::test]
    async fn test_critical_conflict_blocks_sync() {
        let h = harness();
        let resource = Resource::new("fab", ResourceKey::new("default", "VPC", "vpc-1"))
            .with_state(ResourceState::Synced)
            .with_desired(json!({"name": "vpc-1", "subnet": "a"}))
            .with_actual(json!({"name": "vpc-x", "subnet": "b"}));
        let resource = h.resources.save(&resource).await.unwrap();

        let result = h
            .manager
            .execute_action_for_resource(
                &resource.id,
                ResolutionAction::SyncToCluster,
                Some("ops"),
                false,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.requires_manual_review);
        assert!(h.cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_goes_through_state_machine() {
        let h = harness();
        let resource = orphan(&h).await;

        let unapproved = h
            .manager
            .execute_action_for_resource(
                &resource.id,
                ResolutionAction::DeleteFromCluster,
                None,
                false,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(!unapproved.success);
        assert!(unapproved.message.contains("requires user approval"));

        let approved = h
            .manager
            .execute_action_for_resource(
                &resource.id,
                ResolutionAction::DeleteFromCluster,
                Some("ops"),
                false,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(approved.success);
        assert_eq!(h.cluster.calls()[0].operation, "delete_resource");

        let stored = h.resources.get(&resource.id).await.unwrap();
        assert_eq!(stored.resource_state, ResourceState::Pending);
        let history = h.resources.history(&resource.id).await.unwrap();
        assert_eq!(history[0].user.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn test_queue_and_statistics() {
        let h = harness();
        let resource = orphan(&h).await;
        let now = Utc::now();

        let low = AlertDraft::for_resource(
            &resource,
            AlertType::DriftDetected,
            Severity::Low,
            "drift",
            "drift",
        );
        h.manager.raise(low, now).await.unwrap();
        h.manager
            .raise(draft(&resource, Severity::Critical, 10), now - Duration::hours(5))
            .await
            .unwrap();

        let queue = h.manager.queue("fab", now).await.unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].severity, Severity::Critical);
        assert_eq!(queue[0].queue_priority, 5);

        let stats = h.manager.statistics("fab", now).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.open, 2);
        assert_eq!(stats.by_severity["critical"], 1);
        assert_eq!(stats.by_type["drift_detected"], 1);
    }

    #[test]
    fn test_suggested_actions() {
        let h = harness();
        let alert = ReconciliationAlert::new(
            "fab",
            "id",
            ResourceKey::new("default", "VPC", "x"),
            AlertType::MissingFromCluster,
            Severity::Medium,
            "t",
            "m",
            &ReconcilePolicy::default(),
            Utc::now(),
        );
        assert_eq!(
            h.manager.get_suggested_actions(&alert),
            vec![
                ResolutionAction::SyncToCluster,
                ResolutionAction::ManualReview,
                ResolutionAction::Ignore
            ]
        );
    }
}
