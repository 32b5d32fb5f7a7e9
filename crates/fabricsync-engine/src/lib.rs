//! fabricsync Engine - Reconciliation of a fabric's Git and cluster state
//!
//! This crate provides:
//! - **State Machine**: Table-driven six-state resource lifecycle with audited transitions
//! - **Drift Analysis**: Drift scores and typed conflicts between desired and actual specs
//! - **Orphan Detection**: Cluster resources missing from Git, aged and graded by severity
//! - **Alert Lifecycle**: Deduplicated alerts, queue priorities and resolution actions
//! - **Batch Reconciler**: Sequential, parallel, dependency-aware and priority-based remediation
//! - **Conflict Resolution**: Strategy-driven resolution plans
//! - **Diff Engine**: Unified diffs of desired against actual specs
//! - **Stores and Collaborators**: Async traits with in-memory and recording implementations

pub mod alerts;
pub mod analyzer;
pub mod batch;
pub mod dependencies;
pub mod diff;
pub mod error;
pub mod orphans;
pub mod reconciler;
pub mod remote;
pub mod resolver;
pub mod snapshot;
pub mod state_machine;
pub mod store;

pub use alerts::{ActionResult, AlertDraft, AlertManager, AlertStatistics, RaiseOutcome};
pub use analyzer::{ConflictInfo, ConflictType, DriftAnalyzer, DriftReport};
pub use batch::{
    BatchItem, BatchOperation, BatchReconciler, BatchStatus, BatchStrategy, BatchSummary,
    ItemStatus,
};
pub use dependencies::extract_dependency_keys;
pub use diff::{ChangeType, DiffEngine, DiffResult, SpecChange};
pub use error::{EngineError, Result};
pub use orphans::{OrphanDetector, OrphanFinding};
pub use reconciler::{FabricReconciler, OrphanReport, RefreshReport, ResolutionPlan, ScanReport};
pub use remote::{
    ClusterCollaborator, GitCollaborator, RecordingCluster, RecordingGit, RemoteOutcome,
};
pub use resolver::{ConflictResolver, ResolutionReport, ResolutionStrategy};
pub use snapshot::{FabricSnapshot, SnapshotResource};
pub use state_machine::{
    StateMachine, TransitionContext, TransitionOutcome, TransitionRule, can_transition,
    rules_from,
};
pub use store::{
    AlertFilter, AlertStore, MemoryAlertStore, MemoryResourceStore, ResourceFilter, ResourceStore,
};
