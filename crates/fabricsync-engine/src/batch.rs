//! Batch remediation
//!
//! A batch groups resources (and their open alerts) into items that run one resolution action
//! each. The strategy decides order and concurrency:
//!
//! - `sequential`: input order, one item at a time
//! - `parallel`: every item at once
//! - `dependency_aware`: waves of items whose dependencies have finished run concurrently
//! - `priority_based`: most urgent first, one item at a time
//!
//! Item failures are recorded on the item and never abort the batch. Only orchestration
//! failures (a dependency cycle, a storage error) mark the whole batch failed.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use fabricsync_core::{
    CoreError, DriftStatus, ReconcilePolicy, ResolutionAction, Resource, ResourceKey, Severity,
};

use crate::alerts::{ActionResult, AlertManager};
use crate::analyzer::DriftAnalyzer;
use crate::dependencies::extract_dependency_keys;
use crate::error::{EngineError, Result};

/// Metadata key naming the user a batch runs on behalf of
pub const REQUESTED_BY_KEY: &str = "requested_by";

/// Scheduling strategy of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    Sequential,
    Parallel,
    DependencyAware,
    PriorityBased,
}

impl BatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::DependencyAware => "dependency_aware",
            Self::PriorityBased => "priority_based",
        }
    }
}

impl std::fmt::Display for BatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BatchStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().replace('-', "_").to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "dependency_aware" | "dependencies" => Ok(Self::DependencyAware),
            "priority_based" | "priority" => Ok(Self::PriorityBased),
            _ => Err(CoreError::UnknownStrategy {
                value: s.to_string(),
            }),
        }
    }
}

/// Batch lifecycle: pending, running, then completed, failed or cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one batch item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never started because the batch was cancelled
    Skipped,
}

/// One resource in a batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub resource_id: String,
    pub resource_key: ResourceKey,
    /// Open alert the action resolves, if the resource had one
    pub alert_id: Option<String>,
    pub action: ResolutionAction,
    /// Lower runs first under `priority_based`
    pub priority: i64,
    /// Keys of other items in the same batch that must finish first
    pub dependencies: Vec<String>,
    /// Dependency wave the item ran in, under `dependency_aware`
    pub wave: Option<usize>,
    pub status: ItemStatus,
    pub result: Option<ActionResult>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchItem {
    /// Identity used in dependency lists
    pub fn key(&self) -> String {
        self.resource_key.to_string()
    }
}

/// An in-memory batch of remediation items
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    pub batch_id: String,
    pub fabric: String,
    pub strategy: BatchStrategy,
    pub status: BatchStatus,
    pub items: Vec<BatchItem>,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<u64>,
    /// Orchestration error that failed the batch
    pub error: Option<String>,
}

impl BatchOperation {
    fn requested_by(&self) -> Option<String> {
        self.metadata
            .get(REQUESTED_BY_KEY)
            .and_then(Value::as_str)
            .map(String::from)
    }

    fn record(&mut self, index: usize, outcome: ItemOutcome) {
        let item = &mut self.items[index];
        item.started_at = Some(outcome.started_at);
        item.finished_at = Some(outcome.finished_at);

        match (outcome.result, outcome.error) {
            (Some(result), _) if result.success => {
                item.status = ItemStatus::Succeeded;
                item.result = Some(result);
                self.successful += 1;
            }
            (Some(result), _) => {
                tracing::warn!(
                    batch_id = %self.batch_id,
                    resource = %item.resource_key,
                    action = %item.action,
                    message = %result.message,
                    "batch item failed"
                );
                item.status = ItemStatus::Failed;
                item.error = Some(result.message.clone());
                item.result = Some(result);
                self.failed += 1;
            }
            (None, error) => {
                let error = error.unwrap_or_else(|| "no result".to_string());
                tracing::warn!(
                    batch_id = %self.batch_id,
                    resource = %item.resource_key,
                    action = %item.action,
                    %error,
                    "batch item errored"
                );
                item.status = ItemStatus::Failed;
                item.error = Some(error);
                self.failed += 1;
            }
        }
        self.processed += 1;
    }

    /// JSON-friendly view of the batch
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id.clone(),
            fabric: self.fabric.clone(),
            strategy: self.strategy,
            status: self.status,
            total: self.total,
            processed: self.processed,
            successful: self.successful,
            failed: self.failed,
            dry_run: self.dry_run,
            processing_time_ms: self.processing_time_ms,
            error: self.error.clone(),
            items: self
                .items
                .iter()
                .map(|item| ItemSummary {
                    resource: item.key(),
                    action: item.action,
                    priority: item.priority,
                    status: item.status,
                    message: item
                        .error
                        .clone()
                        .or_else(|| item.result.as_ref().map(|r| r.message.clone())),
                })
                .collect(),
        }
    }
}

/// Serializable outcome of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: String,
    pub fabric: String,
    pub strategy: BatchStrategy,
    pub status: BatchStatus,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub processing_time_ms: Option<u64>,
    pub error: Option<String>,
    pub items: Vec<ItemSummary>,
}

impl BatchSummary {
    /// Format as a human-readable string
    pub fn display(&self) -> String {
        let mut lines = vec![format!(
            "Batch {} ({}, {}): {}/{} processed, {} succeeded, {} failed{}",
            self.batch_id,
            self.strategy,
            self.status,
            self.processed,
            self.total,
            self.successful,
            self.failed,
            if self.dry_run { " [dry-run]" } else { "" }
        )];
        for item in &self.items {
            lines.push(format!(
                "  - {} {} [{:?}]{}",
                item.resource,
                item.action,
                item.status,
                item.message
                    .as_ref()
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            ));
        }
        if let Some(error) = &self.error {
            lines.push(format!("  error: {}", error));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub resource: String,
    pub action: ResolutionAction,
    pub priority: i64,
    pub status: ItemStatus,
    pub message: Option<String>,
}

struct ItemOutcome {
    result: Option<ActionResult>,
    error: Option<String>,
    /// The store failed underneath the item; the whole batch stops
    fault: Option<EngineError>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

enum Flow {
    Finished,
    Cancelled,
}

struct BatchEntry {
    operation: BatchOperation,
    cancel: Arc<AtomicBool>,
}

/// Creates, runs and tracks batches
pub struct BatchReconciler {
    alerts: Arc<AlertManager>,
    analyzer: DriftAnalyzer,
    policy: Arc<ReconcilePolicy>,
    batches: Mutex<IndexMap<String, BatchEntry>>,
}

impl BatchReconciler {
    pub fn new(alerts: Arc<AlertManager>, policy: Arc<ReconcilePolicy>) -> Self {
        Self {
            alerts,
            analyzer: DriftAnalyzer::new(policy.clone()),
            policy,
            batches: Mutex::new(IndexMap::new()),
        }
    }

    /// Build a pending batch over `resources`
    ///
    /// Each item takes the suggested action of the resource's most urgent open alert, or an
    /// action derived from its drift status when it has none. Alerts in the batch are tagged
    /// with the batch id and cross-referenced.
    pub async fn create_batch_operation(
        &self,
        resources: &[Resource],
        strategy: BatchStrategy,
        metadata: Map<String, Value>,
    ) -> Result<BatchOperation> {
        let Some(first) = resources.first() else {
            return Err(EngineError::Validation("a batch needs at least one resource".into()));
        };
        let fabric = first.fabric.clone();
        if let Some(other) = resources.iter().find(|r| r.fabric != fabric) {
            return Err(EngineError::Validation(format!(
                "batch mixes fabrics '{}' and '{}'",
                fabric, other.fabric
            )));
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = resources.iter().find(|r| !seen.insert(r.id.as_str())) {
            return Err(EngineError::Validation(format!(
                "resource '{}' appears twice in the batch",
                dup.id
            )));
        }

        let batch_keys: BTreeSet<String> = resources.iter().map(|r| r.key.to_string()).collect();
        let now = Utc::now();
        let mut items = Vec::with_capacity(resources.len());
        for resource in resources {
            items.push(self.build_item(resource, &batch_keys).await?);
        }

        let items = match strategy {
            BatchStrategy::PriorityBased => {
                let mut items = items;
                items.sort_by_key(|item| item.priority);
                items
            }
            BatchStrategy::DependencyAware => topological_order(items),
            BatchStrategy::Sequential | BatchStrategy::Parallel => items,
        };

        let operation = BatchOperation {
            batch_id: format!("batch-{:016x}", rand::random::<u64>()),
            fabric,
            strategy,
            status: BatchStatus::Pending,
            total: items.len(),
            items,
            processed: 0,
            successful: 0,
            failed: 0,
            dry_run: false,
            metadata,
            created_at: now,
            started_at: None,
            completed_at: None,
            processing_time_ms: None,
            error: None,
        };

        self.tag_alerts(&operation, now).await?;
        self.lock()?.insert(
            operation.batch_id.clone(),
            BatchEntry {
                operation: operation.clone(),
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );

        tracing::info!(
            batch_id = %operation.batch_id,
            fabric = %operation.fabric,
            strategy = %strategy,
            items = operation.total,
            "created batch"
        );
        Ok(operation)
    }

    async fn build_item(
        &self,
        resource: &Resource,
        batch_keys: &BTreeSet<String>,
    ) -> Result<BatchItem> {
        let alert = self.alerts.find_open_for_resource(&resource.id).await?;
        let drift = self.analyzer.calculate_drift(resource);

        let (action, severity) = match &alert {
            Some(alert) => (alert.suggested_action, alert.severity),
            None => (
                default_action(drift.status),
                self.policy.drift_severity(drift.score),
            ),
        };

        let own_key = resource.key.to_string();
        let dependencies = extract_dependency_keys(resource, &self.policy)
            .into_iter()
            .map(|key| key.to_string())
            .filter(|key| *key != own_key && batch_keys.contains(key))
            .collect();

        Ok(BatchItem {
            resource_id: resource.id.clone(),
            resource_key: resource.key.clone(),
            alert_id: alert.map(|a| a.id),
            action,
            priority: self.item_priority(resource, severity, drift.score),
            dependencies,
            wave: None,
            status: ItemStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        })
    }

    fn item_priority(&self, resource: &Resource, severity: Severity, drift_score: f64) -> i64 {
        let batch = &self.policy.batch;
        let mut priority = self.policy.severity_base(severity);
        if self.policy.foundational_kinds.contains(&resource.key.kind) {
            priority -= batch.foundational_bonus;
        }
        if drift_score >= batch.high_drift_score {
            priority -= batch.high_drift_bonus;
        }
        priority.max(1)
    }

    async fn tag_alerts(&self, operation: &BatchOperation, now: DateTime<Utc>) -> Result<()> {
        let alert_ids: Vec<&String> = operation
            .items
            .iter()
            .filter_map(|item| item.alert_id.as_ref())
            .collect();

        for id in &alert_ids {
            let mut alert = self.alerts.get(id).await?;
            alert.batch_id = Some(operation.batch_id.clone());
            alert.related_alerts = alert_ids
                .iter()
                .filter(|other| *other != id)
                .map(|other| other.to_string())
                .collect();
            self.alerts.save(&mut alert, now).await?;
        }
        Ok(())
    }

    /// Run a pending batch to completion
    ///
    /// Returns the final summary. A dependency cycle or storage failure marks the batch
    /// failed and is returned as an error; failed items only show up in the counters.
    pub async fn execute_batch(&self, batch_id: &str, dry_run: bool) -> Result<BatchSummary> {
        let (mut operation, cancel) = self.start(batch_id, dry_run)?;
        let clock = Instant::now();
        let user = operation.requested_by();

        tracing::info!(
            batch_id = %operation.batch_id,
            strategy = %operation.strategy,
            items = operation.total,
            dry_run,
            "executing batch"
        );

        let flow = match operation.strategy {
            BatchStrategy::Sequential | BatchStrategy::PriorityBased => {
                self.run_sequential(&mut operation, &cancel, user.as_deref(), dry_run)
                    .await
            }
            BatchStrategy::Parallel => {
                self.run_parallel(&mut operation, &cancel, user.as_deref(), dry_run)
                    .await
            }
            BatchStrategy::DependencyAware => {
                self.run_waves(&mut operation, &cancel, user.as_deref(), dry_run)
                    .await
            }
        };

        operation.processing_time_ms = Some(clock.elapsed().as_millis() as u64);
        operation.completed_at = Some(Utc::now());
        let result = match flow {
            Ok(Flow::Finished) => {
                operation.status = BatchStatus::Completed;
                Ok(())
            }
            Ok(Flow::Cancelled) => {
                operation.status = BatchStatus::Cancelled;
                for item in &mut operation.items {
                    if item.status == ItemStatus::Pending {
                        item.status = ItemStatus::Skipped;
                    }
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(batch_id = %operation.batch_id, error = %e, "batch failed");
                operation.status = BatchStatus::Failed;
                operation.error = Some(e.to_string());
                for item in &mut operation.items {
                    if item.status == ItemStatus::Pending {
                        item.status = ItemStatus::Skipped;
                    }
                }
                Err(e)
            }
        };
        self.publish(&operation)?;

        tracing::info!(
            batch_id = %operation.batch_id,
            status = %operation.status,
            processed = operation.processed,
            successful = operation.successful,
            failed = operation.failed,
            "batch finished"
        );
        result.map(|()| operation.summary())
    }

    fn start(&self, batch_id: &str, dry_run: bool) -> Result<(BatchOperation, Arc<AtomicBool>)> {
        let mut batches = self.lock()?;
        let entry = batches
            .get_mut(batch_id)
            .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))?;
        if entry.operation.status != BatchStatus::Pending {
            return Err(EngineError::Validation(format!(
                "batch '{}' is {}, only pending batches can be executed",
                batch_id, entry.operation.status
            )));
        }
        entry.operation.status = BatchStatus::Running;
        entry.operation.dry_run = dry_run;
        entry.operation.started_at = Some(Utc::now());
        Ok((entry.operation.clone(), entry.cancel.clone()))
    }

    async fn run_sequential(
        &self,
        operation: &mut BatchOperation,
        cancel: &AtomicBool,
        user: Option<&str>,
        dry_run: bool,
    ) -> Result<Flow> {
        for index in 0..operation.items.len() {
            if cancel.load(Ordering::SeqCst) {
                return Ok(Flow::Cancelled);
            }
            operation.items[index].status = ItemStatus::Running;
            self.publish(operation)?;

            let mut outcome = self.run_item(&operation.items[index], user, dry_run).await;
            let fault = outcome.fault.take();
            operation.record(index, outcome);
            self.publish(operation)?;
            if let Some(fault) = fault {
                return Err(fault);
            }
        }
        Ok(Flow::Finished)
    }

    async fn run_parallel(
        &self,
        operation: &mut BatchOperation,
        cancel: &AtomicBool,
        user: Option<&str>,
        dry_run: bool,
    ) -> Result<Flow> {
        if cancel.load(Ordering::SeqCst) {
            return Ok(Flow::Cancelled);
        }
        let all: Vec<usize> = (0..operation.items.len()).collect();
        self.run_wave(operation, &all, user, dry_run).await?;
        Ok(Flow::Finished)
    }

    async fn run_waves(
        &self,
        operation: &mut BatchOperation,
        cancel: &AtomicBool,
        user: Option<&str>,
        dry_run: bool,
    ) -> Result<Flow> {
        let waves = plan_waves(&operation.items).map_err(|remaining| EngineError::Cycle {
            batch_id: operation.batch_id.clone(),
            remaining,
        })?;

        for (number, wave) in waves.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                return Ok(Flow::Cancelled);
            }
            tracing::debug!(
                batch_id = %operation.batch_id,
                wave = number,
                items = wave.len(),
                "dispatching wave"
            );
            for &index in wave {
                operation.items[index].wave = Some(number);
            }
            self.run_wave(operation, wave, user, dry_run).await?;
        }
        Ok(Flow::Finished)
    }

    /// Run the given items concurrently and wait for all of them
    async fn run_wave(
        &self,
        operation: &mut BatchOperation,
        indices: &[usize],
        user: Option<&str>,
        dry_run: bool,
    ) -> Result<()> {
        for &index in indices {
            operation.items[index].status = ItemStatus::Running;
        }
        self.publish(operation)?;

        let outcomes = join_all(
            indices
                .iter()
                .map(|&index| self.run_item(&operation.items[index], user, dry_run)),
        )
        .await;

        let mut fault = None;
        for (&index, mut outcome) in indices.iter().zip(outcomes) {
            fault = fault.or(outcome.fault.take());
            operation.record(index, outcome);
        }
        self.publish(operation)?;
        fault.map_or(Ok(()), Err)
    }

    async fn run_item(&self, item: &BatchItem, user: Option<&str>, dry_run: bool) -> ItemOutcome {
        let started_at = Utc::now();
        let result = match &item.alert_id {
            Some(alert_id) => {
                self.alerts
                    .execute_resolution_action(alert_id, item.action, user, dry_run, started_at)
                    .await
            }
            None => {
                self.alerts
                    .execute_action_for_resource(
                        &item.resource_id,
                        item.action,
                        user,
                        dry_run,
                        started_at,
                    )
                    .await
            }
        };

        let (result, error, fault) = match result {
            Ok(result) => (Some(result), None, None),
            Err(e) => (None, Some(e.to_string()), e.is_storage_fault().then_some(e)),
        };
        ItemOutcome {
            result,
            error,
            fault,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Request cancellation of a running batch
    ///
    /// Items already dispatched finish; nothing new starts once the scheduler sees the request.
    pub fn cancel_batch(&self, batch_id: &str) -> Result<()> {
        let batches = self.lock()?;
        let entry = batches
            .get(batch_id)
            .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))?;
        if entry.operation.status != BatchStatus::Running {
            return Err(EngineError::Validation(format!(
                "batch '{}' is {}, only running batches can be cancelled",
                batch_id, entry.operation.status
            )));
        }
        entry.cancel.store(true, Ordering::SeqCst);
        tracing::info!(batch_id, "cancellation requested");
        Ok(())
    }

    pub fn get_batch(&self, batch_id: &str) -> Result<BatchSummary> {
        self.get_operation(batch_id).map(|op| op.summary())
    }

    pub fn get_operation(&self, batch_id: &str) -> Result<BatchOperation> {
        self.lock()?
            .get(batch_id)
            .map(|entry| entry.operation.clone())
            .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))
    }

    /// Summaries of every tracked batch, oldest first
    pub fn list_batches(&self) -> Result<Vec<BatchSummary>> {
        Ok(self
            .lock()?
            .values()
            .map(|entry| entry.operation.summary())
            .collect())
    }

    /// Discard a batch that is not running
    pub fn remove_batch(&self, batch_id: &str) -> Result<BatchOperation> {
        let mut batches = self.lock()?;
        let status = batches
            .get(batch_id)
            .map(|entry| entry.operation.status)
            .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))?;
        if status == BatchStatus::Running {
            return Err(EngineError::Validation(format!(
                "batch '{}' is running and cannot be removed",
                batch_id
            )));
        }
        batches
            .shift_remove(batch_id)
            .map(|entry| entry.operation)
            .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))
    }

    fn publish(&self, operation: &BatchOperation) -> Result<()> {
        let mut batches = self.lock()?;
        let entry = batches
            .get_mut(&operation.batch_id)
            .ok_or_else(|| EngineError::BatchNotFound(operation.batch_id.clone()))?;
        entry.operation = operation.clone();
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexMap<String, BatchEntry>>> {
        self.batches
            .lock()
            .map_err(|e| EngineError::Storage(format!("batch registry lock poisoned: {}", e)))
    }
}

/// Action for a resource without an open alert
fn default_action(status: DriftStatus) -> ResolutionAction {
    match status {
        DriftStatus::ActualOnly => ResolutionAction::ImportToGit,
        DriftStatus::DesiredOnly => ResolutionAction::SyncToCluster,
        DriftStatus::SpecDrift => ResolutionAction::UpdateGit,
        DriftStatus::InSync | DriftStatus::CreationPending | DriftStatus::DeletionPending => {
            ResolutionAction::Ignore
        }
    }
}

/// Layer item indices into waves of items whose dependencies sit in earlier waves
///
/// Also returns the items that never become ready (members of, or blocked by, a cycle).
fn layer(items: &[BatchItem]) -> (Vec<Vec<usize>>, Vec<usize>) {
    let mut done: BTreeSet<String> = BTreeSet::new();
    let mut remaining: Vec<usize> = (0..items.len()).collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<usize>, Vec<usize>) = remaining
            .into_iter()
            .partition(|&i| items[i].dependencies.iter().all(|dep| done.contains(dep)));
        if ready.is_empty() {
            return (waves, blocked);
        }
        done.extend(ready.iter().map(|&i| items[i].key()));
        waves.push(ready);
        remaining = blocked;
    }
    (waves, Vec::new())
}

/// Waves to dispatch, or the keys stuck in a cycle
fn plan_waves(items: &[BatchItem]) -> std::result::Result<Vec<Vec<usize>>, Vec<String>> {
    match layer(items) {
        (waves, stuck) if stuck.is_empty() => Ok(waves),
        (_, stuck) => Err(stuck.iter().map(|&i| items[i].key()).collect()),
    }
}

/// Order items so dependencies come first; items stuck in a cycle keep their input order
fn topological_order(items: Vec<BatchItem>) -> Vec<BatchItem> {
    let (waves, stuck) = layer(&items);
    let mut slots: BTreeMap<usize, BatchItem> = items.into_iter().enumerate().collect();
    waves
        .into_iter()
        .flatten()
        .chain(stuck)
        .filter_map(|i| slots.remove(&i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertDraft;
    use crate::remote::{RecordingCluster, RecordingGit, RemoteCall};
    use crate::state_machine::StateMachine;
    use crate::store::{AlertStore, MemoryAlertStore, MemoryResourceStore, ResourceStore};
    use fabricsync_core::{AlertType, ResourceState};
    use serde_json::json;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    struct Harness {
        resources: Arc<MemoryResourceStore>,
        alerts: Arc<MemoryAlertStore>,
        git: Arc<RecordingGit>,
        manager: Arc<AlertManager>,
        batches: Arc<BatchReconciler>,
    }

    fn harness_with(git: RecordingGit) -> Harness {
        let clock = Arc::new(AtomicU64::new(0));
        let policy = Arc::new(ReconcilePolicy::default());
        let resources = Arc::new(MemoryResourceStore::new());
        let alerts = Arc::new(MemoryAlertStore::new());
        let git = Arc::new(git);
        let cluster = Arc::new(RecordingCluster::with_clock(clock));
        let state_machine = Arc::new(StateMachine::new(
            resources.clone(),
            alerts.clone(),
            cluster,
            policy.clone(),
        ));
        let manager = Arc::new(AlertManager::new(
            alerts.clone(),
            resources.clone(),
            git.clone(),
            state_machine,
            policy.clone(),
        ));
        let batches = Arc::new(BatchReconciler::new(manager.clone(), policy));
        Harness {
            resources,
            alerts,
            git,
            manager,
            batches,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingGit::with_clock(Arc::new(AtomicU64::new(0))))
    }

    /// A cluster-only resource; its default action imports it into Git
    async fn cluster_only(h: &Harness, kind: &str, name: &str, spec: Value) -> Resource {
        let resource = Resource::new("fab", ResourceKey::new("default", kind, name))
            .with_state(ResourceState::Orphaned)
            .with_actual(spec);
        h.resources.save(&resource).await.unwrap()
    }

    fn call<'a>(calls: &'a [RemoteCall], name: &str) -> &'a RemoteCall {
        calls.iter().find(|c| c.resource.name == name).unwrap()
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "dependency-aware".parse::<BatchStrategy>().unwrap(),
            BatchStrategy::DependencyAware
        );
        assert_eq!(
            "priority".parse::<BatchStrategy>().unwrap(),
            BatchStrategy::PriorityBased
        );
        assert!("random".parse::<BatchStrategy>().is_err());
    }

    #[tokio::test]
    async fn test_create_computes_priority_action_and_dependencies() {
        let h = harness();
        let subnet = cluster_only(
            &h,
            "Subnet",
            "sub-1",
            json!({"vpc": "vpc-a", "ipv4Namespace": "not-in-batch"}),
        )
        .await;
        let vpc = cluster_only(&h, "VPC", "vpc-a", json!({"mtu": 9000})).await;

        let batch = h
            .batches
            .create_batch_operation(&[subnet, vpc], BatchStrategy::PriorityBased, Map::new())
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.total, 2);
        // high severity base 30, minus the high drift bonus, minus the foundational bonus
        assert_eq!(batch.items[0].resource_key.name, "vpc-a");
        assert_eq!(batch.items[0].priority, 22);
        assert_eq!(batch.items[1].priority, 27);
        assert_eq!(batch.items[1].dependencies, vec!["default/VPC/vpc-a"]);
        assert!(
            batch
                .items
                .iter()
                .all(|i| i.action == ResolutionAction::ImportToGit)
        );
    }

    #[tokio::test]
    async fn test_create_rejects_empty_and_duplicate_input() {
        let h = harness();
        let err = h
            .batches
            .create_batch_operation(&[], BatchStrategy::Sequential, Map::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let vpc = cluster_only(&h, "VPC", "vpc-a", json!({})).await;
        let err = h
            .batches
            .create_batch_operation(&[vpc.clone(), vpc], BatchStrategy::Sequential, Map::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("appears twice"));
    }

    #[tokio::test]
    async fn test_alerts_drive_actions_and_are_tagged() {
        let h = harness();
        let a = cluster_only(&h, "VPC", "a", json!({})).await;
        let b = cluster_only(&h, "VPC", "b", json!({})).await;
        let now = Utc::now();
        let mut ids = Vec::new();
        for resource in [&a, &b] {
            let draft = AlertDraft::for_resource(
                resource,
                AlertType::OrphanedResource,
                Severity::Critical,
                "Orphaned resource",
                "only in cluster",
            );
            ids.push(h.manager.raise(draft, now).await.unwrap().into_alert().id);
        }

        let batch = h
            .batches
            .create_batch_operation(&[a, b], BatchStrategy::Sequential, Map::new())
            .await
            .unwrap();
        assert_eq!(batch.items[0].alert_id.as_ref(), Some(&ids[0]));
        assert_eq!(batch.items[0].priority, 10 - 5 - 3);

        let tagged = h.alerts.get(&ids[0]).await.unwrap();
        assert_eq!(tagged.batch_id.as_ref(), Some(&batch.batch_id));
        assert_eq!(tagged.related_alerts, vec![ids[1].clone()]);

        let summary = h.batches.execute_batch(&batch.batch_id, false).await.unwrap();
        assert_eq!(summary.successful, 2);
        let resolved = h.alerts.get(&ids[1]).await.unwrap();
        assert_eq!(resolved.resolved_action, Some(ResolutionAction::ImportToGit));
    }

    #[tokio::test]
    async fn test_dependency_aware_runs_waves() {
        let h = harness();
        let c = cluster_only(
            &h,
            "Subnet",
            "c",
            json!({"vpc": "a", "ipv4Namespace": "b"}),
        )
        .await;
        let a = cluster_only(&h, "VPC", "a", json!({})).await;
        let b = cluster_only(&h, "IPv4Namespace", "b", json!({})).await;

        let batch = h
            .batches
            .create_batch_operation(&[c, a, b], BatchStrategy::DependencyAware, Map::new())
            .await
            .unwrap();
        assert_eq!(batch.items[2].resource_key.name, "c");

        let summary = h.batches.execute_batch(&batch.batch_id, false).await.unwrap();
        assert_eq!(summary.status, BatchStatus::Completed);
        assert_eq!(summary.successful, 3);

        let calls = h.git.calls();
        let (a, b, c) = (call(&calls, "a"), call(&calls, "b"), call(&calls, "c"));
        assert!(a.overlaps(b));
        assert!(c.started > a.finished);
        assert!(c.started > b.finished);

        let operation = h.batches.get_operation(&batch.batch_id).unwrap();
        let waves: Vec<_> = operation.items.iter().map(|i| i.wave).collect();
        assert_eq!(waves, vec![Some(0), Some(0), Some(1)]);
    }

    #[tokio::test]
    async fn test_cycle_fails_batch_without_processing() {
        let h = harness();
        let a = cluster_only(&h, "VPC", "a", json!({"vpc": "b"})).await;
        let b = cluster_only(&h, "VPC", "b", json!({"vpc": "a"})).await;
        let free = cluster_only(&h, "VPC", "free", json!({})).await;

        let batch = h
            .batches
            .create_batch_operation(&[a, b, free], BatchStrategy::DependencyAware, Map::new())
            .await
            .unwrap();
        let err = h
            .batches
            .execute_batch(&batch.batch_id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cycle { .. }));

        let summary = h.batches.get_batch(&batch.batch_id).unwrap();
        assert_eq!(summary.status, BatchStatus::Failed);
        assert_eq!(summary.processed, 0);
        assert!(summary.error.unwrap().contains("dependency cycle"));
        assert!(h.git.calls().is_empty());
    }

    #[tokio::test]
    async fn test_storage_fault_fails_the_batch() {
        let h = harness();
        let first = cluster_only(&h, "VPC", "first", json!({})).await;
        let second = cluster_only(&h, "VPC", "second", json!({})).await;

        let batch = h
            .batches
            .create_batch_operation(&[first, second], BatchStrategy::Sequential, Map::new())
            .await
            .unwrap();
        h.resources.set_offline(true);

        let err = h
            .batches
            .execute_batch(&batch.batch_id, false)
            .await
            .unwrap_err();
        assert!(err.is_storage_fault());

        let summary = h.batches.get_batch(&batch.batch_id).unwrap();
        assert_eq!(summary.status, BatchStatus::Failed);
        assert!(summary.error.unwrap().contains("resource store offline"));
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.items[0].status, ItemStatus::Failed);
        assert_eq!(summary.items[1].status, ItemStatus::Skipped);
        assert!(h.git.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_resource_stays_an_item_failure() {
        let h = harness();
        let kept = cluster_only(&h, "VPC", "kept", json!({})).await;
        let gone = Resource::new("fab", ResourceKey::new("default", "VPC", "gone"))
            .with_state(ResourceState::Orphaned)
            .with_actual(json!({}));

        let batch = h
            .batches
            .create_batch_operation(&[gone, kept], BatchStrategy::Sequential, Map::new())
            .await
            .unwrap();
        let summary = h
            .batches
            .execute_batch(&batch.batch_id, false)
            .await
            .unwrap();

        assert_eq!(summary.status, BatchStatus::Completed);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.successful, 1);
    }

    #[tokio::test]
    async fn test_sequential_is_totally_ordered() {
        let h = harness();
        let mut resources = Vec::new();
        for name in ["x", "y", "z"] {
            resources.push(cluster_only(&h, "VPC", name, json!({})).await);
        }

        let batch = h
            .batches
            .create_batch_operation(&resources, BatchStrategy::Sequential, Map::new())
            .await
            .unwrap();
        h.batches.execute_batch(&batch.batch_id, false).await.unwrap();

        let calls = h.git.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.windows(2).all(|w| w[0].finished < w[1].started));
        let names: Vec<&str> = calls.iter().map(|c| c.resource.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn test_parallel_runs_concurrently() {
        let h = harness();
        let mut resources = Vec::new();
        for name in ["x", "y", "z"] {
            resources.push(cluster_only(&h, "VPC", name, json!({})).await);
        }

        let batch = h
            .batches
            .create_batch_operation(&resources, BatchStrategy::Parallel, Map::new())
            .await
            .unwrap();
        h.batches.execute_batch(&batch.batch_id, false).await.unwrap();

        let calls = h.git.calls();
        assert!(call(&calls, "x").overlaps(call(&calls, "z")));
    }

    #[tokio::test]
    async fn test_item_failures_are_isolated() {
        let h = harness();
        h.git.fail_on(ResourceKey::new("default", "VPC", "bad"));
        let mut resources = Vec::new();
        for name in ["good-1", "bad", "good-2"] {
            resources.push(cluster_only(&h, "VPC", name, json!({})).await);
        }

        let batch = h
            .batches
            .create_batch_operation(&resources, BatchStrategy::Parallel, Map::new())
            .await
            .unwrap();
        let summary = h.batches.execute_batch(&batch.batch_id, false).await.unwrap();

        assert_eq!(summary.status, BatchStatus::Completed);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        let bad = summary.items.iter().find(|i| i.resource.ends_with("/bad")).unwrap();
        assert_eq!(bad.status, ItemStatus::Failed);
        assert!(bad.message.as_ref().unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_item() {
        let git = RecordingGit::new().with_delay(Duration::from_millis(50));
        let h = harness_with(git);
        let mut resources = Vec::new();
        for name in ["x", "y", "z"] {
            resources.push(cluster_only(&h, "VPC", name, json!({})).await);
        }
        let batch = h
            .batches
            .create_batch_operation(&resources, BatchStrategy::Sequential, Map::new())
            .await
            .unwrap();

        let err = h.batches.cancel_batch(&batch.batch_id).unwrap_err();
        assert!(err.to_string().contains("only running batches"));

        let batches = h.batches.clone();
        let id = batch.batch_id.clone();
        let running = tokio::spawn(async move { batches.execute_batch(&id, false).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        h.batches.cancel_batch(&batch.batch_id).unwrap();

        let summary = running.await.unwrap().unwrap();
        assert_eq!(summary.status, BatchStatus::Cancelled);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.items[0].status, ItemStatus::Succeeded);
        assert!(summary.items[1..].iter().all(|i| i.status == ItemStatus::Skipped));
        assert_eq!(h.git.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_calling_git() {
        let h = harness();
        let vpc = cluster_only(&h, "VPC", "vpc-a", json!({})).await;
        let mut metadata = Map::new();
        metadata.insert(REQUESTED_BY_KEY.to_string(), json!("alice"));

        let batch = h
            .batches
            .create_batch_operation(&[vpc], BatchStrategy::Sequential, metadata)
            .await
            .unwrap();
        let summary = h.batches.execute_batch(&batch.batch_id, true).await.unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.successful, 1);
        assert!(summary.items[0].message.as_ref().unwrap().starts_with("[dry-run]"));
        assert!(h.git.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_registry_lifecycle() {
        let h = harness();
        let vpc = cluster_only(&h, "VPC", "vpc-a", json!({})).await;
        let batch = h
            .batches
            .create_batch_operation(&[vpc], BatchStrategy::Sequential, Map::new())
            .await
            .unwrap();
        assert_eq!(h.batches.list_batches().unwrap().len(), 1);

        h.batches.execute_batch(&batch.batch_id, false).await.unwrap();
        let again = h.batches.execute_batch(&batch.batch_id, false).await.unwrap_err();
        assert!(again.is_validation());

        let summary = serde_json::to_value(h.batches.get_batch(&batch.batch_id).unwrap()).unwrap();
        assert_eq!(summary["status"], "completed");
        assert_eq!(summary["batchId"], json!(batch.batch_id));
        assert!(summary["processingTimeMs"].is_u64());

        let removed = h.batches.remove_batch(&batch.batch_id).unwrap();
        assert_eq!(removed.status, BatchStatus::Completed);
        assert!(matches!(
            h.batches.get_batch(&batch.batch_id),
            Err(EngineError::BatchNotFound(_))
        ));
    }

    #[test]
    fn test_topological_order_keeps_cycles_last() {
        let item = |name: &str, deps: &[&str]| BatchItem {
            resource_id: name.to_string(),
            resource_key: ResourceKey::new("default", "VPC", name),
            alert_id: None,
            action: ResolutionAction::Ignore,
            priority: 50,
            dependencies: deps.iter().map(|d| format!("default/VPC/{}", d)).collect(),
            wave: None,
            status: ItemStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        };
        let ordered = topological_order(vec![
            item("loop-1", &["loop-2"]),
            item("child", &["root"]),
            item("loop-2", &["loop-1"]),
            item("root", &[]),
        ]);
        let names: Vec<&str> = ordered.iter().map(|i| i.resource_key.name.as_str()).collect();
        assert_eq!(names, vec!["root", "child", "loop-1", "loop-2"]);
    }
}
