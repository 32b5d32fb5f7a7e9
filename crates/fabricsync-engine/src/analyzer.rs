//! Drift scoring and conflict analysis
//!
//! Drift is the aggregate view (one status and a score per resource); conflicts are the
//! typed, per-field findings that feed alerts and resolution plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;

use fabricsync_core::value::{self, SpecValue};
use fabricsync_core::{DriftStatus, ReconcilePolicy, Resource, ResolutionAction, Severity};

/// Category of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// A field value differs
    Spec,
    /// A field changed type
    Structural,
    /// The cluster reports a validation failure
    Validation,
    /// A referenced resource is itself out of sync
    Dependency,
    /// Raised by external policy checks
    Policy,
    /// Raised by external merge tooling
    Merge,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spec => "spec",
            Self::Structural => "structural",
            Self::Validation => "validation",
            Self::Dependency => "dependency",
            Self::Policy => "policy",
            Self::Merge => "merge",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single typed divergence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub conflict_type: ConflictType,
    /// Dotted path of the field (or the dependency key)
    pub field_path: String,
    #[serde(default)]
    pub desired_value: Option<Value>,
    #[serde(default)]
    pub actual_value: Option<Value>,
    pub severity: Severity,
    /// Applicable actions, most preferred first
    pub resolution_options: Vec<ResolutionAction>,
    /// Whether the conflict may be resolved without review
    pub automatic_resolution: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ConflictInfo {
    fn new(conflict_type: ConflictType, field_path: impl Into<String>, severity: Severity) -> Self {
        Self {
            conflict_type,
            field_path: field_path.into(),
            desired_value: None,
            actual_value: None,
            severity,
            resolution_options: Vec::new(),
            automatic_resolution: false,
            metadata: Map::new(),
        }
    }

    fn values(mut self, desired: Option<&Value>, actual: Option<&Value>) -> Self {
        self.desired_value = desired.cloned();
        self.actual_value = actual.cloned();
        self
    }

    fn options(mut self, options: &[ResolutionAction]) -> Self {
        self.resolution_options = options.to_vec();
        self
    }

    fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Whether this conflict forbids unattended resolution
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Result of a drift calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub status: DriftStatus,
    /// Always within `[0.0, 1.0]`
    pub score: f64,
    pub details: Value,
}

impl DriftReport {
    pub fn is_in_sync(&self) -> bool {
        self.status == DriftStatus::InSync
    }
}

/// Compares desired and actual specs
#[derive(Debug, Clone)]
pub struct DriftAnalyzer {
    policy: Arc<ReconcilePolicy>,
}

impl DriftAnalyzer {
    pub fn new(policy: Arc<ReconcilePolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Compute the drift status and score of a resource without modifying it
    ///
    /// A pending creation stays pending until the cluster reports the resource. A pending
    /// deletion stays pending while the cluster still holds a spec that differs from Git;
    /// equal specs are in sync.
    pub fn calculate_drift(&self, resource: &Resource) -> DriftReport {
        let desired = resource.desired_spec.as_ref();
        let actual = resource.actual_spec.as_ref();

        let (status, score, differing, compared) = match (desired, actual) {
            (None, None) => (DriftStatus::InSync, 0.0, Vec::new(), 0),
            (None, Some(_)) => (DriftStatus::ActualOnly, 1.0, Vec::new(), 0),
            (Some(_), None) => (DriftStatus::DesiredOnly, 1.0, Vec::new(), 0),
            (Some(Value::Object(d)), Some(Value::Object(a))) => {
                let ignored = &self.policy.ignored_fields;
                let compared = value::union_keys(d, a, ignored).len();
                let differing = value::differing_keys(d, a, ignored);
                if differing.is_empty() {
                    (DriftStatus::InSync, 0.0, differing, compared)
                } else {
                    let score = (differing.len() as f64 / compared.max(1) as f64).clamp(0.0, 1.0);
                    (DriftStatus::SpecDrift, score, differing, compared)
                }
            }
            (Some(d), Some(a)) => {
                if value::values_equal(d, a) {
                    (DriftStatus::InSync, 0.0, Vec::new(), 1)
                } else {
                    (DriftStatus::SpecDrift, 1.0, vec!["$".to_string()], 1)
                }
            }
        };

        let status = match (resource.drift_status, status) {
            (DriftStatus::CreationPending, DriftStatus::DesiredOnly) => {
                DriftStatus::CreationPending
            }
            (DriftStatus::DeletionPending, s) if actual.is_some() && s != DriftStatus::InSync => {
                DriftStatus::DeletionPending
            }
            (_, s) => s,
        };

        DriftReport {
            status,
            score,
            details: json!({
                "differingFields": differing,
                "comparedFields": compared,
                "desiredPresent": desired.is_some(),
                "actualPresent": actual.is_some(),
            }),
        }
    }

    /// Recalculate drift and store it on the resource, stamping `last_drift_check`
    pub fn apply_drift(&self, resource: &mut Resource, now: DateTime<Utc>) -> DriftReport {
        let report = self.calculate_drift(resource);
        resource.drift_status = report.status;
        resource.drift_score = report.score;
        resource.drift_details = report.details.clone();
        resource.last_drift_check = Some(now);
        report
    }

    /// Typed conflicts between the desired and actual spec
    ///
    /// Spec and structural findings need both specs, validation findings need the actual
    /// spec, and dependency findings are reported from `dependencies` regardless.
    pub fn analyze_conflicts(
        &self,
        resource: &Resource,
        dependencies: &[Resource],
    ) -> Vec<ConflictInfo> {
        let mut conflicts = Vec::new();

        if let (Some(desired), Some(actual)) = (&resource.desired_spec, &resource.actual_spec) {
            self.spec_conflicts(desired, actual, &mut conflicts);
            self.structural_conflicts(desired, actual, &mut conflicts);
        }
        if let Some(actual) = &resource.actual_spec {
            validation_conflicts(actual, &mut conflicts);
        }
        dependency_conflicts(dependencies, &mut conflicts);

        conflicts
    }

    fn spec_conflicts(&self, desired: &SpecValue, actual: &SpecValue, out: &mut Vec<ConflictInfo>) {
        use ResolutionAction::*;

        let (d, a) = match (desired, actual) {
            (Value::Object(d), Value::Object(a)) => (d, a),
            _ => {
                if !value::values_equal(desired, actual) {
                    out.push(
                        ConflictInfo::new(ConflictType::Spec, "$", Severity::High)
                            .values(Some(desired), Some(actual))
                            .options(&[ManualReview, UpdateGit, SyncToCluster]),
                    );
                }
                return;
            }
        };

        let policy = &self.policy;
        for field in value::differing_keys(d, a, &policy.ignored_fields) {
            let (dv, av) = (d.get(&field), a.get(&field));
            let magnitude = value::change_magnitude(dv, av);

            let conflict = if policy.identity_fields.contains(&field) {
                ConflictInfo::new(ConflictType::Spec, &field, Severity::Critical)
                    .options(&[ManualReview])
            } else {
                let severity = if policy.high_priority_fields.contains(&field) {
                    Severity::High
                } else if magnitude >= policy.medium_change_threshold {
                    Severity::Medium
                } else {
                    Severity::Low
                };
                let mut conflict = ConflictInfo::new(ConflictType::Spec, &field, severity)
                    .options(&[UpdateGit, SyncToCluster, ManualReview]);
                conflict.automatic_resolution = policy.auto_resolvable_fields.contains(&field);
                conflict
            };

            out.push(
                conflict
                    .values(dv, av)
                    .meta("changeMagnitude", magnitude),
            );
        }
    }

    fn structural_conflicts(
        &self,
        desired: &SpecValue,
        actual: &SpecValue,
        out: &mut Vec<ConflictInfo>,
    ) {
        if let (Value::Object(d), Value::Object(a)) = (desired, actual) {
            for key in value::union_keys(d, a, &self.policy.ignored_fields) {
                if let (Some(dv), Some(av)) = (d.get(key), a.get(key)) {
                    walk_structure(key, dv, av, out);
                }
            }
        }
    }
}

fn walk_structure(path: &str, desired: &Value, actual: &Value, out: &mut Vec<ConflictInfo>) {
    if !value::same_type(desired, actual) {
        out.push(
            ConflictInfo::new(ConflictType::Structural, path, Severity::High)
                .values(Some(desired), Some(actual))
                .options(&[ResolutionAction::ManualReview])
                .meta("desiredType", value::type_name(desired))
                .meta("actualType", value::type_name(actual)),
        );
        return;
    }

    if let (Value::Object(d), Value::Object(a)) = (desired, actual) {
        for (key, dv) in d {
            if let Some(av) = a.get(key) {
                walk_structure(&value::join_path(path, key), dv, av, out);
            }
        }
    }
}

fn validation_conflicts(actual: &SpecValue, out: &mut Vec<ConflictInfo>) {
    let Some(conditions) = value::lookup_path(actual, "status.conditions").and_then(Value::as_array)
    else {
        return;
    };

    for (index, condition) in conditions.iter().enumerate() {
        if condition.get("type").and_then(Value::as_str) != Some("ValidationError") {
            continue;
        }
        let message = condition
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("cluster rejected the resource");
        out.push(
            ConflictInfo::new(
                ConflictType::Validation,
                format!("status.conditions[{}]", index),
                Severity::High,
            )
            .values(None, Some(condition))
            .options(&[ResolutionAction::ManualReview, ResolutionAction::UpdateGit])
            .meta("message", message),
        );
    }
}

fn dependency_conflicts(dependencies: &[Resource], out: &mut Vec<ConflictInfo>) {
    for dependency in dependencies {
        if dependency.drift_status == DriftStatus::InSync {
            continue;
        }
        out.push(
            ConflictInfo::new(
                ConflictType::Dependency,
                dependency.key.to_string(),
                Severity::Medium,
            )
            .options(&[ResolutionAction::ManualReview])
            .meta("dependency", dependency.key.to_string())
            .meta("driftStatus", dependency.drift_status.as_str()),
        );
    }
}
