//! Reconciliation policy
//!
//! Every numeric threshold the engine uses lives here so operators can tune it from a
//! YAML file instead of recompiling. Defaults reproduce the stock behaviour:
//!
//! ```yaml
//! severityBase: { critical: 10, high: 30, medium: 50, low: 70 }
//! priorityAgeCapHours: 20
//! orphanThresholds: { criticalAfter: 7days, highAfter: 1day, mediumAfter: 1h }
//! driftThresholds: { high: 0.5, medium: 0.2 }
//! ignoredFields: [status]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::alert::Severity;
use crate::error::{CoreError, Result};

/// Tunable policy for drift scoring, alerting and batch prioritisation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilePolicy {
    /// Base queue priority per severity (lower = more urgent)
    pub severity_base: SeverityBase,

    /// Maximum number of hours of age that may lower an alert's queue priority
    pub priority_age_cap_hours: i64,

    /// Age cutoffs for orphaned resource severity
    pub orphan_thresholds: OrphanThresholds,

    /// Drift score cutoffs for drift alert severity
    pub drift_thresholds: DriftThresholds,

    /// Change magnitude at or above which a spec conflict is MEDIUM instead of LOW
    pub medium_change_threshold: f64,

    /// Identity fields; any change is CRITICAL
    pub identity_fields: BTreeSet<String>,

    /// Fields whose changes are always HIGH
    pub high_priority_fields: BTreeSet<String>,

    /// Fields that may be resolved without review
    pub auto_resolvable_fields: BTreeSet<String>,

    /// Top-level fields excluded from comparison (cluster-owned)
    pub ignored_fields: BTreeSet<String>,

    /// Kinds other resources are built on; reconciled first within a batch
    pub foundational_kinds: BTreeSet<String>,

    /// Spec fields that reference another resource, mapped to the referenced kind
    pub reference_fields: BTreeMap<String, String>,

    /// How long an alert stays valid after creation
    #[serde(with = "humantime_serde")]
    pub alert_ttl: Duration,

    /// How long a resource may stay PENDING before a sync timeout is allowed
    #[serde(with = "humantime_serde")]
    pub sync_timeout: Duration,

    /// Batch item priority adjustments
    pub batch: BatchPriorityPolicy,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            severity_base: SeverityBase::default(),
            priority_age_cap_hours: 20,
            orphan_thresholds: OrphanThresholds::default(),
            drift_thresholds: DriftThresholds::default(),
            medium_change_threshold: 0.5,
            identity_fields: string_set(&["name", "namespace", "kind", "apiVersion"]),
            high_priority_fields: string_set(&[
                "spec",
                "vpc",
                "ipv4Namespace",
                "vlanNamespace",
                "subnets",
            ]),
            auto_resolvable_fields: string_set(&["labels", "annotations"]),
            ignored_fields: string_set(&["status"]),
            foundational_kinds: string_set(&[
                "IPv4Namespace",
                "VLANNamespace",
                "VPC",
                "Switch",
            ]),
            reference_fields: [
                ("vpc", "VPC"),
                ("vpcs", "VPC"),
                ("ipv4Namespace", "IPv4Namespace"),
                ("vlanNamespace", "VLANNamespace"),
                ("switch", "Switch"),
            ]
            .into_iter()
            .map(|(field, kind)| (field.to_string(), kind.to_string()))
            .collect(),
            alert_ttl: Duration::from_secs(30 * 24 * 3600),
            sync_timeout: Duration::from_secs(10 * 60),
            batch: BatchPriorityPolicy::default(),
        }
    }
}

fn string_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl ReconcilePolicy {
    /// Load a policy from a YAML (or JSON) file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a policy document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let policy: Self = serde_yaml::from_str(content)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Check internal consistency of the thresholds
    pub fn validate(&self) -> Result<()> {
        let base = &self.severity_base;
        if !(base.critical >= 1
            && base.critical <= base.high
            && base.high <= base.medium
            && base.medium <= base.low)
        {
            return Err(invalid(
                "severityBase must satisfy 1 <= critical <= high <= medium <= low",
            ));
        }
        if self.priority_age_cap_hours < 0 {
            return Err(invalid("priorityAgeCapHours must not be negative"));
        }

        let orphan = &self.orphan_thresholds;
        if !(orphan.medium_after <= orphan.high_after && orphan.high_after <= orphan.critical_after)
        {
            return Err(invalid(
                "orphanThresholds must satisfy mediumAfter <= highAfter <= criticalAfter",
            ));
        }

        let drift = &self.drift_thresholds;
        if !(0.0..=1.0).contains(&drift.medium)
            || !(0.0..=1.0).contains(&drift.high)
            || drift.medium > drift.high
        {
            return Err(invalid(
                "driftThresholds must lie in [0, 1] with medium <= high",
            ));
        }
        if !(0.0..=1.0).contains(&self.medium_change_threshold) {
            return Err(invalid("mediumChangeThreshold must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.batch.high_drift_score) {
            return Err(invalid("batch.highDriftScore must lie in [0, 1]"));
        }
        if self.alert_ttl.is_zero() {
            return Err(invalid("alertTtl must be greater than zero"));
        }
        Ok(())
    }

    /// Base queue priority for a severity
    pub fn severity_base(&self, severity: Severity) -> i64 {
        match severity {
            Severity::Critical => self.severity_base.critical,
            Severity::High => self.severity_base.high,
            Severity::Medium => self.severity_base.medium,
            Severity::Low => self.severity_base.low,
        }
    }

    /// Queue priority of an alert of `severity` that is `age_hours` old
    ///
    /// `max(base - min(age, cap), 1)`: older alerts become more urgent, up to the cap.
    pub fn queue_priority(&self, severity: Severity, age_hours: i64) -> i64 {
        let boost = age_hours.clamp(0, self.priority_age_cap_hours.max(0));
        (self.severity_base(severity) - boost).max(1)
    }

    /// Severity of an orphan that has existed for `age`
    pub fn orphan_severity(&self, age: chrono::Duration) -> Severity {
        let age = age.to_std().unwrap_or(Duration::ZERO);
        let thresholds = &self.orphan_thresholds;
        if age > thresholds.critical_after {
            Severity::Critical
        } else if age > thresholds.high_after {
            Severity::High
        } else if age > thresholds.medium_after {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Severity of a drift alert for a given score
    pub fn drift_severity(&self, score: f64) -> Severity {
        if score >= self.drift_thresholds.high {
            Severity::High
        } else if score >= self.drift_thresholds.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Alert TTL as a chrono duration
    pub fn alert_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.alert_ttl).unwrap_or(chrono::Duration::MAX)
    }

    /// Sync timeout as a chrono duration
    pub fn sync_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.sync_timeout).unwrap_or(chrono::Duration::MAX)
    }
}

fn invalid(message: &str) -> CoreError {
    CoreError::InvalidPolicy {
        message: message.to_string(),
    }
}

/// Base queue priorities per severity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityBase {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl Default for SeverityBase {
    fn default() -> Self {
        Self {
            critical: 10,
            high: 30,
            medium: 50,
            low: 70,
        }
    }
}

/// Orphan age cutoffs (strictly greater than the cutoff escalates)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrphanThresholds {
    #[serde(with = "humantime_serde")]
    pub critical_after: Duration,
    #[serde(with = "humantime_serde")]
    pub high_after: Duration,
    #[serde(with = "humantime_serde")]
    pub medium_after: Duration,
}

impl Default for OrphanThresholds {
    fn default() -> Self {
        Self {
            critical_after: Duration::from_secs(7 * 24 * 3600),
            high_after: Duration::from_secs(24 * 3600),
            medium_after: Duration::from_secs(3600),
        }
    }
}

/// Drift score cutoffs (at or above escalates)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            high: 0.5,
            medium: 0.2,
        }
    }
}

/// Adjustments applied to batch item priorities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchPriorityPolicy {
    /// Subtracted from the priority of foundational kinds
    pub foundational_bonus: i64,
    /// Drift score above which the high-drift bonus applies
    pub high_drift_score: f64,
    /// Subtracted from the priority of heavily drifted resources
    pub high_drift_bonus: i64,
}

impl Default for BatchPriorityPolicy {
    fn default() -> Self {
        Self {
            foundational_bonus: 5,
            high_drift_score: 0.8,
            high_drift_bonus: 3,
        }
    }
}
