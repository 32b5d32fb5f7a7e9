//! Conflict resolution planning
//!
//! The resolver never touches Git or the cluster. It turns a list of conflicts into a plan
//! of per-field steps, and [`ConflictResolver::apply_to_spec`] turns that plan into the
//! merged spec the caller may then commit or apply.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use fabricsync_core::CoreError;

use crate::analyzer::{ConflictInfo, ConflictType};

/// How conflicts should be settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Settle only conflicts marked for automatic resolution, in favour of Git
    Automatic,
    /// Git wins every spec conflict
    FavorGit,
    /// The cluster wins every spec conflict
    FavorCluster,
    /// Nothing is settled; every conflict goes to review
    Manual,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::FavorGit => "favor_git",
            Self::FavorCluster => "favor_cluster",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().replace('-', "_").to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(Self::Automatic),
            "favor_git" | "git" => Ok(Self::FavorGit),
            "favor_cluster" | "cluster" => Ok(Self::FavorCluster),
            "manual" => Ok(Self::Manual),
            _ => Err(CoreError::UnknownStrategy {
                value: s.to_string(),
            }),
        }
    }
}

/// What to do with one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStep {
    /// Keep the Git value and push it to the cluster
    AdoptDesired,
    /// Take the cluster value into Git
    AdoptActual,
    /// Leave for a human
    ManualReview,
}

/// One planned step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedResolution {
    pub field_path: String,
    pub conflict_type: ConflictType,
    pub step: ResolutionStep,
    /// The value the field ends up with (absent means removed)
    #[serde(default)]
    pub value: Option<Value>,
}

/// Outcome of planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    pub strategy: ResolutionStrategy,
    pub conflicts_detected: usize,
    /// Field paths settled by the plan; always a subset of the detected conflicts
    pub conflicts_resolved: Vec<String>,
    pub resolution_actions: Vec<PlannedResolution>,
    pub warnings: Vec<String>,
}

impl ResolutionReport {
    /// Whether every conflict was settled
    pub fn fully_resolved(&self) -> bool {
        self.conflicts_resolved.len() == self.conflicts_detected
    }

    pub fn needs_review(&self) -> bool {
        self.resolution_actions
            .iter()
            .any(|a| a.step == ResolutionStep::ManualReview)
    }
}

/// Plans conflict resolutions
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Plan how to settle `conflicts`
    ///
    /// Unresolvable conflicts become manual review steps and never an error. A critical
    /// conflict is never settled by any strategy other than manual.
    pub fn resolve_conflicts(
        &self,
        conflicts: &[ConflictInfo],
        strategy: ResolutionStrategy,
    ) -> ResolutionReport {
        let mut report = ResolutionReport {
            strategy,
            conflicts_detected: conflicts.len(),
            conflicts_resolved: Vec::new(),
            resolution_actions: Vec::new(),
            warnings: Vec::new(),
        };

        let structural: Vec<&str> = conflicts
            .iter()
            .filter(|c| c.conflict_type == ConflictType::Structural)
            .map(|c| c.field_path.as_str())
            .collect();

        for conflict in conflicts {
            let planned = plan_step(conflict, strategy);
            let held = conflict.conflict_type == ConflictType::Spec
                && structural.iter().any(|path| covers(&conflict.field_path, path));

            let step = if strategy == ResolutionStrategy::Manual {
                ResolutionStep::ManualReview
            } else if conflict.is_blocking() {
                report.warnings.push(format!(
                    "conflict on '{}' requires manual review: {} severity blocks {} resolution",
                    conflict.field_path, conflict.severity, strategy
                ));
                ResolutionStep::ManualReview
            } else if planned == ResolutionStep::ManualReview {
                report.warnings.push(format!(
                    "{} conflict on '{}' cannot be resolved with {}",
                    conflict.conflict_type, conflict.field_path, strategy
                ));
                ResolutionStep::ManualReview
            } else if held {
                report.warnings.push(format!(
                    "conflict on '{}' is held for review behind a structural conflict",
                    conflict.field_path
                ));
                ResolutionStep::ManualReview
            } else {
                planned
            };

            if step != ResolutionStep::ManualReview {
                report.conflicts_resolved.push(conflict.field_path.clone());
            }

            let value = match step {
                ResolutionStep::AdoptDesired => conflict.desired_value.clone(),
                ResolutionStep::AdoptActual => conflict.actual_value.clone(),
                ResolutionStep::ManualReview => None,
            };
            report.resolution_actions.push(PlannedResolution {
                field_path: conflict.field_path.clone(),
                conflict_type: conflict.conflict_type,
                step,
                value,
            });
        }

        report
    }

    /// Merge a plan into the desired spec
    ///
    /// Fields adopted from the cluster take the actual value (or are removed when the cluster
    /// lacks them). Fields under review keep their desired value.
    pub fn apply_to_spec(&self, report: &ResolutionReport, desired: &Value) -> Value {
        let mut merged = desired.clone();
        let Some(map) = merged.as_object_mut() else {
            return merged;
        };

        for action in &report.resolution_actions {
            if action.step != ResolutionStep::AdoptActual
                || action.conflict_type != ConflictType::Spec
            {
                continue;
            }
            match &action.value {
                Some(value) => {
                    map.insert(action.field_path.clone(), value.clone());
                }
                None => {
                    map.remove(&action.field_path);
                }
            }
        }
        merged
    }
}

/// Whether a spec conflict on `field` touches a conflict held at `held`
fn covers(field: &str, held: &str) -> bool {
    held == field
        || held
            .strip_prefix(field)
            .is_some_and(|rest| rest.starts_with('.'))
}

fn plan_step(conflict: &ConflictInfo, strategy: ResolutionStrategy) -> ResolutionStep {
    match (strategy, conflict.conflict_type) {
        (ResolutionStrategy::Manual, _) => ResolutionStep::ManualReview,
        (ResolutionStrategy::Automatic, _) if conflict.automatic_resolution => {
            ResolutionStep::AdoptDesired
        }
        (ResolutionStrategy::FavorGit, ConflictType::Spec) => ResolutionStep::AdoptDesired,
        (ResolutionStrategy::FavorCluster, ConflictType::Spec) => ResolutionStep::AdoptActual,
        _ => ResolutionStep::ManualReview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::DriftAnalyzer;
    use fabricsync_core::{ReconcilePolicy, Resource, ResourceKey};
    use serde_json::json;
    use std::sync::Arc;

    fn conflicts(desired: Value, actual: Value) -> Vec<ConflictInfo> {
        let resource = Resource::new("fab", ResourceKey::new("default", "VPC", "vpc-1"))
            .with_desired(desired)
            .with_actual(actual);
        let analyzer = DriftAnalyzer::new(Arc::new(ReconcilePolicy::default()));
        analyzer.analyze_conflicts(&resource, &[])
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "favor-git".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::FavorGit
        );
        assert!("yolo".parse::<ResolutionStrategy>().is_err());
    }

    #[test]
    fn test_automatic_only_settles_allowlisted_fields() {
        let found = conflicts(
            json!({"labels": {"a": "1"}, "subnet": "x"}),
            json!({"labels": {"a": "2"}, "subnet": "y"}),
        );
        let report =
            ConflictResolver::new().resolve_conflicts(&found, ResolutionStrategy::Automatic);

        assert_eq!(report.conflicts_detected, 2);
        assert_eq!(report.conflicts_resolved, vec!["labels"]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.needs_review());
    }

    #[test]
    fn test_favor_cluster_merges_actual_values() {
        let desired = json!({"subnet": "x", "mtu": 1500, "extra": true});
        let actual = json!({"subnet": "y", "mtu": 9000});
        let found = conflicts(desired.clone(), actual);

        let resolver = ConflictResolver::new();
        let report = resolver.resolve_conflicts(&found, ResolutionStrategy::FavorCluster);
        assert!(report.fully_resolved());

        let merged = resolver.apply_to_spec(&report, &desired);
        assert_eq!(merged, json!({"subnet": "y", "mtu": 9000}));
    }

    #[test]
    fn test_critical_blocks_non_manual_strategies() {
        let found = conflicts(
            json!({"name": "a", "subnet": "x"}),
            json!({"name": "b", "subnet": "y"}),
        );
        let resolver = ConflictResolver::new();

        for strategy in [
            ResolutionStrategy::Automatic,
            ResolutionStrategy::FavorGit,
            ResolutionStrategy::FavorCluster,
        ] {
            let report = resolver.resolve_conflicts(&found, strategy);
            assert!(!report.conflicts_resolved.contains(&"name".to_string()));
            assert!(
                report
                    .warnings
                    .iter()
                    .any(|w| w.contains("'name' requires manual review"))
            );
            let name_step = report
                .resolution_actions
                .iter()
                .find(|a| a.field_path == "name")
                .unwrap();
            assert_eq!(name_step.step, ResolutionStep::ManualReview);
        }

        let manual = resolver.resolve_conflicts(&found, ResolutionStrategy::Manual);
        assert!(manual.conflicts_resolved.is_empty());
        assert!(manual.warnings.is_empty());
        assert!(
            manual
                .resolution_actions
                .iter()
                .all(|a| a.step == ResolutionStep::ManualReview)
        );
    }

    #[test]
    fn test_type_change_is_never_merged() {
        let desired = json!({"mtu": "1500", "subnet": "x", "b": {"c": 1}});
        let actual = json!({"mtu": 1500, "subnet": "y", "b": {"c": [1]}});
        let found = conflicts(desired.clone(), actual);
        let resolver = ConflictResolver::new();

        for strategy in [ResolutionStrategy::FavorCluster, ResolutionStrategy::FavorGit] {
            let report = resolver.resolve_conflicts(&found, strategy);
            assert!(!report.conflicts_resolved.contains(&"mtu".to_string()));
            assert!(!report.conflicts_resolved.contains(&"b".to_string()));
            assert_eq!(report.conflicts_resolved, vec!["subnet"]);
            assert!(
                report
                    .warnings
                    .iter()
                    .any(|w| w.contains("'mtu' is held for review"))
            );
        }

        let report = resolver.resolve_conflicts(&found, ResolutionStrategy::FavorCluster);
        let merged = resolver.apply_to_spec(&report, &desired);
        assert_eq!(merged, json!({"mtu": "1500", "subnet": "y", "b": {"c": 1}}));
    }

    #[test]
    fn test_resolved_is_subset_of_detected() {
        let found = conflicts(
            json!({"a": 1, "b": {"c": 1}, "labels": {}}),
            json!({"a": "1", "b": {"c": [1]}, "labels": {"x": "y"}}),
        );
        for strategy in [
            ResolutionStrategy::Automatic,
            ResolutionStrategy::FavorGit,
            ResolutionStrategy::FavorCluster,
            ResolutionStrategy::Manual,
        ] {
            let report = ConflictResolver::new().resolve_conflicts(&found, strategy);
            assert!(report.conflicts_resolved.len() <= report.conflicts_detected);
            for path in &report.conflicts_resolved {
                assert!(found.iter().any(|c| &c.field_path == path));
            }
        }
    }
}
