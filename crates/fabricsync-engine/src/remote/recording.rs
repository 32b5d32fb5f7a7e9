//! Recording collaborators
//!
//! Every call is logged with a start and finish sequence number taken from a shared clock,
//! so tests can assert on ordering and overlap across Git and the cluster.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fabricsync_core::{Resource, ResourceKey, SpecValue};

use super::{ClusterCollaborator, GitCollaborator, RemoteOutcome};

/// One recorded collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub operation: &'static str,
    pub resource: ResourceKey,
    /// Sequence number when the call started
    pub started: u64,
    /// Sequence number when the call returned
    pub finished: u64,
}

impl RemoteCall {
    /// Whether two calls were in flight at the same time
    pub fn overlaps(&self, other: &RemoteCall) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

#[derive(Default)]
struct Recorder {
    clock: Arc<AtomicU64>,
    calls: Mutex<Vec<RemoteCall>>,
    failing: Mutex<BTreeSet<ResourceKey>>,
    delay: Option<Duration>,
}

impl Recorder {
    fn with_clock(clock: Arc<AtomicU64>) -> Self {
        Self {
            clock,
            ..Default::default()
        }
    }

    async fn record(&self, operation: &'static str, resource: &Resource) -> RemoteOutcome {
        let started = self.clock.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        let finished = self.clock.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RemoteCall {
                operation,
                resource: resource.key.clone(),
                started,
                finished,
            });
        }

        let fails = self
            .failing
            .lock()
            .map(|f| f.contains(&resource.key))
            .unwrap_or(false);
        if fails {
            RemoteOutcome::failed(format!("{} rejected {}", operation, resource.key))
        } else {
            RemoteOutcome::ok().with_detail("operation", operation)
        }
    }

    fn fail_on(&self, key: ResourceKey) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(key);
        }
    }

    fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

/// Git collaborator that records calls instead of pushing commits
#[derive(Default)]
pub struct RecordingGit {
    recorder: Recorder,
}

impl RecordingGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a sequence clock with another recorder
    pub fn with_clock(clock: Arc<AtomicU64>) -> Self {
        Self {
            recorder: Recorder::with_clock(clock),
        }
    }

    /// Delay every call (used to force concurrent execution to overlap)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.recorder.delay = Some(delay);
        self
    }

    /// Make every call for this resource fail
    pub fn fail_on(&self, key: ResourceKey) {
        self.recorder.fail_on(key);
    }

    /// Recorded calls in completion order
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.recorder.calls()
    }
}

#[async_trait]
impl GitCollaborator for RecordingGit {
    async fn import_resource(&self, resource: &Resource) -> RemoteOutcome {
        self.recorder.record("import_resource", resource).await
    }

    async fn update_spec(&self, resource: &Resource, _spec: &SpecValue) -> RemoteOutcome {
        self.recorder.record("update_spec", resource).await
    }
}

/// Cluster collaborator that records calls instead of talking to the API server
pub struct RecordingCluster {
    recorder: Recorder,
    available: bool,
}

impl Default for RecordingCluster {
    fn default() -> Self {
        Self {
            recorder: Recorder::default(),
            available: true,
        }
    }
}

impl RecordingCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a sequence clock with another recorder
    pub fn with_clock(clock: Arc<AtomicU64>) -> Self {
        Self {
            recorder: Recorder::with_clock(clock),
            available: true,
        }
    }

    /// Delay every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.recorder.delay = Some(delay);
        self
    }

    /// Report the cluster as unavailable
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Make every call for this resource fail
    pub fn fail_on(&self, key: ResourceKey) {
        self.recorder.fail_on(key);
    }

    /// Recorded calls in completion order
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.recorder.calls()
    }
}

#[async_trait]
impl ClusterCollaborator for RecordingCluster {
    async fn apply_resource(&self, resource: &Resource, _spec: &SpecValue) -> RemoteOutcome {
        self.recorder.record("apply_resource", resource).await
    }

    async fn delete_resource(&self, resource: &Resource) -> RemoteOutcome {
        self.recorder.record("delete_resource", resource).await
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}
