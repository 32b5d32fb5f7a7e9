//! Resource lifecycle state machine
//!
//! ```text
//! DRAFT ──► COMMITTED ──► SYNCED ◄──► DRIFTED
//!              ▲             │           │
//!              │             ▼           ▼
//!              └──────── PENDING ────────┘
//!
//! ORPHANED ──► COMMITTED | PENDING | DRAFT
//! ```
//!
//! Transitions come from a static table. Each entry names a trigger, a condition that must
//! hold and an action that runs before the new state is committed. A transition that is not
//! in the table, whose condition is false, whose action fails or whose resource changed
//! since it was read is returned as a rejected [`TransitionOutcome`]; the stored resource is
//! left untouched in every one of those cases.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use fabricsync_core::{
    AlertType, DriftStatus, ReconcilePolicy, ReconciliationAlert, Resource, ResourceState,
    Severity, StateTransitionRecord, Trigger,
};

use crate::alerts::{AlertDraft, raise_deduplicated};
use crate::analyzer::DriftAnalyzer;
use crate::error::{EngineError, Result};
use crate::remote::ClusterCollaborator;
use crate::store::{AlertStore, ResourceStore};

/// Predicate guarding a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Always,
    /// The resource has a non-null desired spec
    HasValidSpec,
    ClusterAvailable,
    SpecsMatch,
    SpecsDiffer,
    /// Git sync has seen a commit newer than the one applied
    NewCommitAvailable,
    /// The resource has been pending longer than the sync timeout
    SyncTimeoutExceeded,
    UserApproved,
    /// Present in the cluster but not in Git
    OnlyInCluster,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::HasValidSpec => "has_valid_spec",
            Self::ClusterAvailable => "cluster_available",
            Self::SpecsMatch => "specs_match",
            Self::SpecsDiffer => "specs_differ",
            Self::NewCommitAvailable => "new_commit_available",
            Self::SyncTimeoutExceeded => "sync_timeout_exceeded",
            Self::UserApproved => "user_approved",
            Self::OnlyInCluster => "only_in_cluster",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Side effect run before a transition is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    None,
    /// Adopt the newest available commit
    StageCommit,
    /// Clear drift bookkeeping
    MarkSynced,
    /// Record drift and raise a drift alert
    FlagDrift,
    /// Apply the desired spec to the cluster
    RequestClusterSync,
    /// Delete the resource from the cluster
    RequestClusterDeletion,
}

impl TransitionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::StageCommit => "stage_commit",
            Self::MarkSynced => "mark_synced",
            Self::FlagDrift => "flag_drift",
            Self::RequestClusterSync => "request_cluster_sync",
            Self::RequestClusterDeletion => "request_cluster_deletion",
        }
    }
}

impl std::fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRule {
    pub to: ResourceState,
    pub trigger: Trigger,
    pub condition: Condition,
    pub action: TransitionAction,
    pub requires_user_approval: bool,
}

const fn rule(
    to: ResourceState,
    trigger: Trigger,
    condition: Condition,
    action: TransitionAction,
) -> TransitionRule {
    TransitionRule {
        to,
        trigger,
        condition,
        action,
        requires_user_approval: false,
    }
}

const fn approved(
    to: ResourceState,
    trigger: Trigger,
    condition: Condition,
    action: TransitionAction,
) -> TransitionRule {
    TransitionRule {
        to,
        trigger,
        condition,
        action,
        requires_user_approval: true,
    }
}

use Condition as C;
use ResourceState as S;
use TransitionAction as A;
use Trigger as T;

const FROM_DRAFT: &[TransitionRule] = &[
    rule(S::Committed, T::Commit, C::HasValidSpec, A::StageCommit),
    rule(S::Orphaned, T::OrphanDetected, C::OnlyInCluster, A::None),
];

const FROM_COMMITTED: &[TransitionRule] = &[
    rule(S::Synced, T::SyncCompleted, C::SpecsMatch, A::MarkSynced),
    rule(S::Drifted, T::SyncCompleted, C::SpecsDiffer, A::FlagDrift),
    rule(S::Draft, T::Edit, C::Always, A::None),
    rule(S::Pending, T::Reconcile, C::ClusterAvailable, A::RequestClusterSync),
];

const FROM_SYNCED: &[TransitionRule] = &[
    rule(S::Drifted, T::DriftDetected, C::SpecsDiffer, A::FlagDrift),
    rule(S::Pending, T::NewCommit, C::NewCommitAvailable, A::RequestClusterSync),
    rule(S::Pending, T::Reconcile, C::ClusterAvailable, A::RequestClusterSync),
    approved(S::Pending, T::Delete, C::UserApproved, A::RequestClusterDeletion),
    rule(S::Orphaned, T::OrphanDetected, C::OnlyInCluster, A::None),
];

const FROM_DRIFTED: &[TransitionRule] = &[
    rule(S::Synced, T::DriftResolved, C::SpecsMatch, A::MarkSynced),
    approved(S::Pending, T::Reconcile, C::ClusterAvailable, A::RequestClusterSync),
    approved(S::Pending, T::Delete, C::UserApproved, A::RequestClusterDeletion),
    rule(S::Orphaned, T::OrphanDetected, C::OnlyInCluster, A::None),
];

const FROM_PENDING: &[TransitionRule] = &[
    rule(S::Synced, T::SyncCompleted, C::SpecsMatch, A::MarkSynced),
    rule(S::Drifted, T::SyncCompleted, C::SpecsDiffer, A::FlagDrift),
    rule(S::Committed, T::SyncTimeout, C::SyncTimeoutExceeded, A::None),
];

const FROM_ORPHANED: &[TransitionRule] = &[
    rule(S::Committed, T::Import, C::HasValidSpec, A::StageCommit),
    approved(S::Pending, T::Delete, C::UserApproved, A::RequestClusterDeletion),
    rule(S::Draft, T::Adopt, C::Always, A::None),
];

/// Transitions leaving a state
pub fn rules_from(from: ResourceState) -> &'static [TransitionRule] {
    match from {
        S::Draft => FROM_DRAFT,
        S::Committed => FROM_COMMITTED,
        S::Synced => FROM_SYNCED,
        S::Drifted => FROM_DRIFTED,
        S::Pending => FROM_PENDING,
        S::Orphaned => FROM_ORPHANED,
    }
}

/// Look up the table entry for a transition
pub fn find_rule(
    from: ResourceState,
    to: ResourceState,
    trigger: Trigger,
) -> Option<&'static TransitionRule> {
    rules_from(from)
        .iter()
        .find(|rule| rule.to == to && rule.trigger == trigger)
}

/// Whether the table allows a transition (conditions not evaluated)
pub fn can_transition(from: ResourceState, to: ResourceState, trigger: Trigger) -> bool {
    find_rule(from, to, trigger).is_some()
}

/// Caller-supplied context for a transition
#[derive(Debug, Clone)]
pub struct TransitionContext {
    /// Recorded in the history entry
    pub reason: String,
    /// User that approved the transition, for entries that require approval
    pub approved_by: Option<String>,
    pub now: DateTime<Utc>,
}

impl TransitionContext {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            approved_by: None,
            now: Utc::now(),
        }
    }

    pub fn approved_by(mut self, user: impl Into<String>) -> Self {
        self.approved_by = Some(user.into());
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Why a transition was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    InvalidTransition,
    ApprovalRequired,
    ConditionNotMet,
    ActionFailed,
    /// The resource changed since the caller read it
    StaleResource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRejection {
    pub kind: RejectionKind,
    pub message: String,
}

/// Result of [`StateMachine::execute_transition`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub accepted: bool,
    pub from: ResourceState,
    pub to: ResourceState,
    pub trigger: Trigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<TransitionRejection>,
    /// The saved resource when accepted, the caller's copy otherwise
    pub resource: Resource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<StateTransitionRecord>,
    /// Alert raised by the transition action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<ReconciliationAlert>,
}

impl TransitionOutcome {
    fn rejected(
        resource: &Resource,
        to: ResourceState,
        trigger: Trigger,
        kind: RejectionKind,
        message: String,
    ) -> Self {
        Self {
            accepted: false,
            from: resource.resource_state,
            to,
            trigger,
            rejection: Some(TransitionRejection { kind, message }),
            resource: resource.clone(),
            record: None,
            alert: None,
        }
    }

    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        self.rejection.as_ref().map(|r| r.kind)
    }
}

/// Executes lifecycle transitions against the resource store
pub struct StateMachine {
    resources: Arc<dyn ResourceStore>,
    alerts: Arc<dyn AlertStore>,
    cluster: Arc<dyn ClusterCollaborator>,
    analyzer: DriftAnalyzer,
    policy: Arc<ReconcilePolicy>,
}

impl StateMachine {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        alerts: Arc<dyn AlertStore>,
        cluster: Arc<dyn ClusterCollaborator>,
        policy: Arc<ReconcilePolicy>,
    ) -> Self {
        Self {
            resources,
            alerts,
            cluster,
            analyzer: DriftAnalyzer::new(policy.clone()),
            policy,
        }
    }

    /// Validate and execute a transition
    ///
    /// Returns `Err` only for store failures; every expected refusal is a rejected outcome.
    pub async fn execute_transition(
        &self,
        resource: &Resource,
        to: ResourceState,
        trigger: Trigger,
        context: &TransitionContext,
        user: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let from = resource.resource_state;
        let reject = |kind: RejectionKind, message: String| -> Result<TransitionOutcome> {
            tracing::warn!(
                resource = %resource.key,
                %from,
                %to,
                %trigger,
                reason = %message,
                "transition rejected"
            );
            Ok(TransitionOutcome::rejected(resource, to, trigger, kind, message))
        };

        let Some(rule) = find_rule(from, to, trigger) else {
            return reject(
                RejectionKind::InvalidTransition,
                format!("invalid transition {} -> {} on {}", from, to, trigger),
            );
        };

        let stored = self.resources.get(&resource.id).await?;
        if stored.revision != resource.revision || stored.resource_state != from {
            return reject(
                RejectionKind::StaleResource,
                format!(
                    "stale resource: store has revision {} ({}), caller read revision {} ({})",
                    stored.revision, stored.resource_state, resource.revision, from
                ),
            );
        }

        if rule.requires_user_approval && context.approved_by.is_none() {
            return reject(
                RejectionKind::ApprovalRequired,
                format!("transition {} -> {} requires user approval", from, to),
            );
        }

        if !self.condition_holds(rule.condition, resource, context).await {
            return reject(
                RejectionKind::ConditionNotMet,
                format!("condition not met: {}", rule.condition),
            );
        }

        let mut updated = resource.clone();
        let staged_alert = match self.run_action(rule.action, &mut updated, context).await {
            Ok(alert) => alert,
            Err(e) => {
                return reject(
                    RejectionKind::ActionFailed,
                    format!("action {} failed: {}", rule.action, e),
                );
            }
        };

        updated.resource_state = to;
        updated.state_changed_at = context.now;
        let saved = match self.resources.save(&updated).await {
            Ok(saved) => saved,
            Err(EngineError::StaleRevision { expected, found, .. }) => {
                return reject(
                    RejectionKind::StaleResource,
                    format!(
                        "stale resource: expected revision {}, found {}",
                        expected, found
                    ),
                );
            }
            Err(e) => return Err(e),
        };

        let record = StateTransitionRecord {
            resource_id: saved.id.clone(),
            from,
            to,
            trigger,
            reason: context.reason.clone(),
            user: user.map(String::from),
            timestamp: context.now,
        };
        self.resources.append_history(&record).await?;

        let alert = match staged_alert {
            Some(draft) => Some(
                raise_deduplicated(self.alerts.as_ref(), &self.policy, draft, context.now)
                    .await?
                    .into_alert(),
            ),
            None => None,
        };

        tracing::info!(
            resource = %saved.key,
            %from,
            %to,
            %trigger,
            action = %rule.action,
            "transition committed"
        );

        Ok(TransitionOutcome {
            accepted: true,
            from,
            to,
            trigger,
            rejection: None,
            resource: saved,
            record: Some(record),
            alert,
        })
    }

    async fn condition_holds(
        &self,
        condition: Condition,
        resource: &Resource,
        context: &TransitionContext,
    ) -> bool {
        match condition {
            C::Always => true,
            C::HasValidSpec => resource
                .desired_spec
                .as_ref()
                .is_some_and(|spec| !spec.is_null()),
            C::ClusterAvailable => self.cluster.is_available().await,
            C::SpecsMatch => {
                resource.is_git_tracked()
                    && resource.is_in_cluster()
                    && self.analyzer.calculate_drift(resource).is_in_sync()
            }
            C::SpecsDiffer => !self.analyzer.calculate_drift(resource).is_in_sync(),
            C::NewCommitAvailable => resource
                .available_commit
                .as_ref()
                .is_some_and(|available| resource.commit.as_ref() != Some(available)),
            C::SyncTimeoutExceeded => {
                context.now.signed_duration_since(resource.state_changed_at)
                    >= self.policy.sync_timeout()
            }
            C::UserApproved => context.approved_by.is_some(),
            C::OnlyInCluster => resource.is_in_cluster() && !resource.is_git_tracked(),
        }
    }

    /// Run an action on the working copy; returns a staged alert if the action raises one
    async fn run_action(
        &self,
        action: TransitionAction,
        resource: &mut Resource,
        context: &TransitionContext,
    ) -> Result<Option<AlertDraft>> {
        match action {
            A::None => Ok(None),
            A::StageCommit => {
                if let Some(available) = resource.available_commit.clone() {
                    resource.commit = Some(available);
                }
                Ok(None)
            }
            A::MarkSynced => {
                self.analyzer.apply_drift(resource, context.now);
                if let Some(available) = resource.available_commit.clone() {
                    resource.commit = Some(available);
                }
                Ok(None)
            }
            A::FlagDrift => {
                let report = self.analyzer.apply_drift(resource, context.now);
                let draft = if report.status == DriftStatus::DesiredOnly {
                    AlertDraft::for_resource(
                        resource,
                        AlertType::MissingFromCluster,
                        Severity::High,
                        "Resource missing from cluster",
                        format!("{} is tracked in Git but not running", resource.key),
                    )
                } else {
                    AlertDraft::for_resource(
                        resource,
                        AlertType::DriftDetected,
                        self.policy.drift_severity(report.score),
                        format!("Drift detected on {}", resource.key),
                        format!(
                            "{} differs from Git (drift score {:.2})",
                            resource.key, report.score
                        ),
                    )
                };
                Ok(Some(draft.with_details(report.details)))
            }
            A::RequestClusterSync => {
                let desired = resource.desired_spec.clone().ok_or_else(|| {
                    EngineError::Validation(format!("{} has no desired spec", resource.key))
                })?;
                self.cluster
                    .apply_resource(resource, &desired)
                    .await
                    .into_result("cluster")?;
                if !resource.is_in_cluster() {
                    resource.drift_status = DriftStatus::CreationPending;
                }
                Ok(None)
            }
            A::RequestClusterDeletion => {
                self.cluster
                    .delete_resource(resource)
                    .await
                    .into_result("cluster")?;
                resource.drift_status = DriftStatus::DeletionPending;
                Ok(None)
            }
        }
    }
}
