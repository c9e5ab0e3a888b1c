//! The `Workload` resource shape and the `ObjectStore` boundary trait
//! (spec.md §3 "Desired/Observed Workload", §6 "Custom resource").
//!
//! The cluster API machinery that actually delivers these objects is out of
//! scope (spec.md §1); `ObjectStore` is the seam, mirroring how
//! `hypervisor::Client` takes injectable hooks instead of hardwiring its
//! collaborators rather than a typed Kubernetes client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `Phase` literals (spec.md §6): the reconciler never writes anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Restoring,
    Ready,
    Error,
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Restoring => "Restoring",
            Phase::Ready => "Ready",
            Phase::Error => "Error",
            Phase::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// One condition record (spec.md §3): type, status, reason, message,
/// timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Condition {
    pub fn ready_true(reason: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            type_: "Ready".to_string(),
            status: true,
            reason: reason.to_string(),
            message: String::new(),
            timestamp,
        }
    }

    pub fn ready_false(reason: &str, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            type_: "Ready".to_string(),
            status: false,
            reason: reason.to_string(),
            message: message.into(),
            timestamp,
        }
    }
}

/// `{snapshot: string}` (spec.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub snapshot: String,
}

/// `{phase, snapshot, conditions}` (spec.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub phase: Option<Phase>,
    pub snapshot: Option<String>,
    pub conditions: Vec<Condition>,
}

/// One observed workload object (spec.md §3). `generation` stands in for
/// the cluster API's generation counter the reconciler's event filter keys
/// on (spec.md §4.E Event filtering).
#[derive(Debug, Clone)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub generation: u64,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub finalizers: Vec<String>,
    pub spec: WorkloadSpec,
    pub status: WorkloadStatus,
}

impl Workload {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            generation: 1,
            deletion_timestamp: None,
            finalizers: Vec::new(),
            spec: WorkloadSpec {
                snapshot: snapshot.into(),
            },
            status: WorkloadStatus::default(),
        }
    }

    pub fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers.iter().any(|f| f == name)
    }

    pub fn key(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }
}

/// The boundary trait the reconciler is generic over. Any implementation
/// that can load, persist, and enumerate `Workload`s by `(namespace, name)`
/// satisfies it — a real implementation would wrap a generated Kubernetes
/// client; tests use an in-memory `HashMap`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Option<Workload>;
    async fn update(&self, workload: Workload);
}
