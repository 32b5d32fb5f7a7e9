//! Orphan detection
//!
//! A resource is orphaned when the cluster reports it and Git does not track it. The age of
//! an orphan is measured from the cluster object's creation timestamp.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use fabricsync_core::{ReconcilePolicy, Resource, ResourceKey, Severity};

/// One orphaned resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanFinding {
    pub resource_id: String,
    pub fabric: String,
    pub key: ResourceKey,
    pub created_at: DateTime<Utc>,
    /// Never negative
    #[serde(serialize_with = "serialize_secs")]
    pub orphaned_duration: Duration,
    pub severity: Severity,
}

impl OrphanFinding {
    pub fn orphaned_secs(&self) -> i64 {
        self.orphaned_duration.num_seconds()
    }
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(duration.num_seconds())
}

/// Finds resources present in the cluster but absent from Git
#[derive(Debug, Clone)]
pub struct OrphanDetector<'a> {
    policy: &'a ReconcilePolicy,
}

impl<'a> OrphanDetector<'a> {
    pub fn new(policy: &'a ReconcilePolicy) -> Self {
        Self { policy }
    }

    /// Orphans among `cluster`, given the keys Git tracks
    pub fn detect(
        &self,
        cluster: &[Resource],
        tracked: &BTreeSet<ResourceKey>,
        now: DateTime<Utc>,
    ) -> Vec<OrphanFinding> {
        let mut findings: Vec<OrphanFinding> = cluster
            .iter()
            .filter(|r| r.is_in_cluster() && !tracked.contains(&r.key))
            .map(|r| self.finding(r, now))
            .collect();
        findings.sort_by(|a, b| a.key.cmp(&b.key));
        findings
    }

    /// Orphans among stored resources, where Git-tracked means `desired_spec` is set
    pub fn detect_in(&self, resources: &[Resource], now: DateTime<Utc>) -> Vec<OrphanFinding> {
        let tracked: BTreeSet<ResourceKey> = resources
            .iter()
            .filter(|r| r.is_git_tracked())
            .map(|r| r.key.clone())
            .collect();
        self.detect(resources, &tracked, now)
    }

    fn finding(&self, resource: &Resource, now: DateTime<Utc>) -> OrphanFinding {
        let created_at = resource.creation_timestamp();
        let orphaned_duration = now.signed_duration_since(created_at).max(Duration::zero());
        OrphanFinding {
            resource_id: resource.id.clone(),
            fabric: resource.fabric.clone(),
            key: resource.key.clone(),
            created_at,
            orphaned_duration,
            severity: self.policy.orphan_severity(orphaned_duration),
        }
    }
}
