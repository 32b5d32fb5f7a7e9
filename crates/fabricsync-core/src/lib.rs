//! fabricsync Core - Core types for fabric reconciliation
//!
//! This crate provides the foundational types used throughout fabricsync:
//! - `Resource`: A fabric resource with desired (Git) and actual (cluster) specs
//! - `ResourceState`: The six-state resource lifecycle
//! - `ReconciliationAlert`: Persisted findings with their resolve/acknowledge/suppress lifecycle
//! - `ReconcilePolicy`: Tunable thresholds for drift, alerting and batch priorities
//! - `value`: Structured spec comparison shared by drift scoring and conflict analysis

pub mod alert;
pub mod error;
pub mod lifecycle;
pub mod policy;
pub mod resource;
pub mod value;

pub use alert::{
    AlertLifecycleError, AlertStatus, AlertType, ReconciliationAlert, ResolutionAction, Severity,
};
pub use error::{CoreError, Result};
pub use lifecycle::{ResourceState, StateTransitionRecord, Trigger};
pub use policy::{
    BatchPriorityPolicy, DriftThresholds, OrphanThresholds, ReconcilePolicy, SeverityBase,
};
pub use resource::{DriftStatus, Resource, ResourceKey};
pub use value::SpecValue;
