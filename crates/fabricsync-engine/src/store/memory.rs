//! In-memory stores
//!
//! Used by the offline CLI and by unit tests that need a store without a database.
//! Operation counts are tracked so tests can assert on store traffic.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fabricsync_core::{ReconciliationAlert, Resource, StateTransitionRecord};

use super::{AlertFilter, AlertStore, ResourceFilter, ResourceStore};
use crate::error::{EngineError, Result};

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub saves: usize,
    pub creates: usize,
    pub updates: usize,
    pub history_appends: usize,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| EngineError::Storage("store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| EngineError::Storage("store lock poisoned".to_string()))
}

/// In-memory resource store
#[derive(Clone, Default)]
pub struct MemoryResourceStore {
    /// Resources keyed by id
    resources: Arc<RwLock<BTreeMap<String, Resource>>>,
    /// History keyed by resource id
    history: Arc<RwLock<BTreeMap<String, Vec<StateTransitionRecord>>>>,
    operations: Arc<RwLock<OperationCounts>>,
    /// When set, reads and writes fail with a storage error
    offline: Arc<AtomicBool>,
}

impl MemoryResourceStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated resources (revisions are kept as given)
    pub fn with_resources(resources: Vec<Resource>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.resources.write() {
            for resource in resources {
                map.insert(resource.id.clone(), resource);
            }
        }
        store
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    /// Count stored resources
    pub fn resource_count(&self) -> usize {
        self.resources.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Simulate an unreachable backend
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn count(&self, update: impl FnOnce(&mut OperationCounts)) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EngineError::Storage("resource store offline".to_string()));
        }
        update(&mut *write(&self.operations)?);
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get(&self, id: &str) -> Result<Resource> {
        self.count(|ops| ops.gets += 1)?;
        read(&self.resources)?
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::ResourceNotFound(id.to_string()))
    }

    async fn list(&self, filter: &ResourceFilter) -> Result<Vec<Resource>> {
        self.count(|ops| ops.lists += 1)?;
        let mut resources: Vec<Resource> = read(&self.resources)?
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        resources.sort_by(|a, b| (&a.fabric, &a.key).cmp(&(&b.fabric, &b.key)));
        Ok(resources)
    }

    async fn save(&self, resource: &Resource) -> Result<Resource> {
        self.count(|ops| ops.saves += 1)?;
        let mut map = write(&self.resources)?;

        let found = map.get(&resource.id).map(|r| r.revision).unwrap_or(0);
        if found != resource.revision {
            return Err(EngineError::StaleRevision {
                id: resource.id.clone(),
                expected: resource.revision,
                found,
            });
        }

        let mut saved = resource.clone();
        saved.revision = resource.revision + 1;
        map.insert(saved.id.clone(), saved.clone());
        Ok(saved)
    }

    async fn append_history(&self, record: &StateTransitionRecord) -> Result<()> {
        self.count(|ops| ops.history_appends += 1)?;
        write(&self.history)?
            .entry(record.resource_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn history(&self, resource_id: &str) -> Result<Vec<StateTransitionRecord>> {
        self.count(|_| {})?;
        Ok(read(&self.history)?
            .get(resource_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory alert store, preserving creation order
#[derive(Clone, Default)]
pub struct MemoryAlertStore {
    alerts: Arc<RwLock<IndexMap<String, ReconciliationAlert>>>,
    operations: Arc<RwLock<OperationCounts>>,
}

impl MemoryAlertStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    /// All alerts in creation order
    pub fn all_alerts(&self) -> Vec<ReconciliationAlert> {
        self.alerts
            .read()
            .map(|alerts| alerts.values().cloned().collect())
            .unwrap_or_default()
    }

    fn count(&self, update: impl FnOnce(&mut OperationCounts)) -> Result<()> {
        update(&mut *write(&self.operations)?);
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn create(&self, alert: &ReconciliationAlert) -> Result<()> {
        self.count(|ops| ops.creates += 1)?;
        let mut alerts = write(&self.alerts)?;
        if alerts.contains_key(&alert.id) {
            return Err(EngineError::AlertAlreadyExists(alert.id.clone()));
        }
        alerts.insert(alert.id.clone(), alert.clone());
        Ok(())
    }

    async fn update(&self, alert: &ReconciliationAlert) -> Result<()> {
        self.count(|ops| ops.updates += 1)?;
        let mut alerts = write(&self.alerts)?;
        match alerts.get_mut(&alert.id) {
            Some(existing) => {
                *existing = alert.clone();
                Ok(())
            }
            None => Err(EngineError::AlertNotFound(alert.id.clone())),
        }
    }

    async fn get(&self, id: &str) -> Result<ReconciliationAlert> {
        self.count(|ops| ops.gets += 1)?;
        read(&self.alerts)?
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::AlertNotFound(id.to_string()))
    }

    async fn query(&self, filter: &AlertFilter) -> Result<Vec<ReconciliationAlert>> {
        self.count(|ops| ops.lists += 1)?;
        Ok(read(&self.alerts)?
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }
}
