//! Spec diff rendering for drifted resources

use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeSet;

use fabricsync_core::{Resource, ResourceKey, value};

use crate::error::Result;

/// Renders the difference between a resource's desired and actual specs
pub struct DiffEngine {
    /// Number of context lines around each change
    pub context_lines: usize,

    /// Top-level fields stripped before rendering
    ignored_fields: BTreeSet<String>,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self {
            context_lines: 3,
            ignored_fields: BTreeSet::new(),
        }
    }

    pub fn with_context(context_lines: usize) -> Self {
        Self {
            context_lines,
            ..Self::new()
        }
    }

    /// Strip these top-level fields from both sides (usually the policy's ignored fields)
    pub fn ignoring(mut self, fields: &BTreeSet<String>) -> Self {
        self.ignored_fields = fields.clone();
        self
    }

    /// Diff one resource, Git (desired) on the old side and the cluster (actual) on the new
    pub fn diff_resource(&self, resource: &Resource) -> Result<SpecChange> {
        let desired = self.strip(resource.desired_spec.as_ref());
        let actual = self.strip(resource.actual_spec.as_ref());

        let (change_type, diff) = match (&desired, &actual) {
            (None, None) => (ChangeType::Unchanged, None),
            (Some(d), None) => (
                ChangeType::Missing,
                Some(DiffContent::new_removal(&render(d)?)),
            ),
            (None, Some(a)) => (
                ChangeType::Untracked,
                Some(DiffContent::new_addition(&render(a)?)),
            ),
            (Some(d), Some(a)) if value::values_equal(d, a) => (ChangeType::Unchanged, None),
            (Some(d), Some(a)) => (
                ChangeType::Modified,
                Some(self.compute_text_diff(&render(d)?, &render(a)?)),
            ),
        };

        Ok(SpecChange {
            key: resource.key.clone(),
            change_type,
            diff,
        })
    }

    /// Diff every resource, keeping only the ones that differ
    pub fn diff_resources(&self, resources: &[Resource]) -> Result<DiffResult> {
        let mut changes = Vec::new();
        for resource in resources {
            let change = self.diff_resource(resource)?;
            if change.change_type != ChangeType::Unchanged {
                changes.push(change);
            }
        }
        Ok(DiffResult { changes })
    }

    fn strip(&self, spec: Option<&Value>) -> Option<Value> {
        let mut spec = spec?.clone();
        if let Some(map) = spec.as_object_mut() {
            map.retain(|k, _| !self.ignored_fields.contains(k));
        }
        Some(spec)
    }

    /// Compute a text diff between two strings, keeping `context_lines` around each change
    fn compute_text_diff(&self, old: &str, new: &str) -> DiffContent {
        let diff = TextDiff::from_lines(old, new);
        let mut lines = Vec::new();

        for (idx, group) in diff.grouped_ops(self.context_lines).iter().enumerate() {
            if idx > 0 {
                lines.push(DiffLine {
                    line_type: LineType::Separator,
                    content: "...".to_string(),
                    old_line_no: None,
                    new_line_no: None,
                });
            }
            for op in group {
                for change in diff.iter_changes(op) {
                    let line_type = match change.tag() {
                        ChangeTag::Delete => LineType::Removed,
                        ChangeTag::Insert => LineType::Added,
                        ChangeTag::Equal => LineType::Context,
                    };

                    lines.push(DiffLine {
                        line_type,
                        content: change.value().trim_end().to_string(),
                        old_line_no: change.old_index(),
                        new_line_no: change.new_index(),
                    });
                }
            }
        }

        DiffContent { lines }
    }

    /// Generate a human-readable summary
    pub fn summary(&self, result: &DiffResult) -> String {
        let count = |t: ChangeType| result.changes.iter().filter(|c| c.change_type == t).count();

        let mut parts = Vec::new();
        for (change_type, label) in [
            (ChangeType::Modified, "drifted"),
            (ChangeType::Missing, "missing from cluster"),
            (ChangeType::Untracked, "untracked in git"),
        ] {
            let n = count(change_type);
            if n > 0 {
                parts.push(format!("{} {}", n, label));
            }
        }

        if parts.is_empty() {
            "No drift".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Differences across a set of resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResult {
    pub changes: Vec<SpecChange>,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// How one resource differs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecChange {
    pub key: ResourceKey,
    pub change_type: ChangeType,
    pub diff: Option<DiffContent>,
}

impl SpecChange {
    /// Unified diff with `git/` and `cluster/` headers
    pub fn to_unified_diff(&self) -> String {
        let Some(diff) = &self.diff else {
            return String::new();
        };
        format!(
            "--- git/{key}\n+++ cluster/{key}\n{}",
            diff.to_unified_diff(),
            key = self.key
        )
    }
}

/// Type of spec difference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Both sides present and equal (or both absent)
    Unchanged,

    /// Both sides present and different
    Modified,

    /// Only in Git
    Missing,

    /// Only in the cluster
    Untracked,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Unchanged => write!(f, "unchanged"),
            ChangeType::Modified => write!(f, "modified"),
            ChangeType::Missing => write!(f, "missing"),
            ChangeType::Untracked => write!(f, "untracked"),
        }
    }
}

/// Detailed diff content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffContent {
    pub lines: Vec<DiffLine>,
}

impl DiffContent {
    /// Create a diff showing all lines as additions
    fn new_addition(content: &str) -> Self {
        let lines = content
            .lines()
            .enumerate()
            .map(|(i, line)| DiffLine {
                line_type: LineType::Added,
                content: line.to_string(),
                old_line_no: None,
                new_line_no: Some(i),
            })
            .collect();

        Self { lines }
    }

    /// Create a diff showing all lines as removals
    fn new_removal(content: &str) -> Self {
        let lines = content
            .lines()
            .enumerate()
            .map(|(i, line)| DiffLine {
                line_type: LineType::Removed,
                content: line.to_string(),
                old_line_no: Some(i),
                new_line_no: None,
            })
            .collect();

        Self { lines }
    }

    /// Generate a unified diff body
    pub fn to_unified_diff(&self) -> String {
        let mut output = String::new();

        for line in &self.lines {
            let prefix = match line.line_type {
                LineType::Added => "+",
                LineType::Removed => "-",
                LineType::Context => " ",
                LineType::Separator => "",
            };
            output.push_str(prefix);
            output.push_str(&line.content);
            output.push('\n');
        }

        output
    }

    pub fn added(&self) -> usize {
        self.lines.iter().filter(|l| l.line_type == LineType::Added).count()
    }

    pub fn removed(&self) -> usize {
        self.lines.iter().filter(|l| l.line_type == LineType::Removed).count()
    }
}

/// A single line in a diff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffLine {
    pub line_type: LineType,
    pub content: String,
    /// Line number on the Git side
    pub old_line_no: Option<usize>,
    /// Line number on the cluster side
    pub new_line_no: Option<usize>,
}

/// Type of diff line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Added,
    Removed,
    Context,
    /// Gap between two hunks
    Separator,
}

fn render(spec: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(spec)?)
}
