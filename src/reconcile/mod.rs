//! Component E — Reconciler (spec.md §4.E): a level-triggered control loop
//! binding a `Workload` resource to the orchestrator (D). Grounded on
//! `examples/original_source/apps/operator/controllers/sporelet_controller.go`,
//! expanded with the finalizer/deletion/condition machinery spec.md adds on
//! top of that simpler original.

pub mod collaborators;
pub mod dispatch;
pub mod object;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info};

use crate::config::{Settings, FINALIZER};
use crate::error;

use object::{Condition, ObjectStore, Phase, Workload};

/// What the reconciler asks its caller to do next (spec.md §4.E: "return
/// with requeue after 1 minute" on failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing more to do until the next externally-triggered event.
    Done,
    /// Ask the work queue to re-dispatch this key after the given delay.
    Requeue(Duration),
}

/// Injectable collaborators the reconciler calls out to (spec.md §1: the
/// registry transport tool and the host shim subprocess are external
/// collaborators, specified only at the interface). Mirrors the
/// hypervisor client's own injection-seam philosophy (spec.md §9) rather
/// than hardwiring `std::process::Command` calls that integration tests
/// would otherwise have to actually spawn.
pub trait Collaborators: Send + Sync {
    /// `pullSnapshot(desiredRef, workDir)` (spec.md §4.E step 7).
    fn pull(&self, oci_ref: &str, work_dir: &Path) -> Result<(), String>;
    /// `spore-shim restore --id <vmID> <workDir>` (spec.md §4.E step 9).
    /// Returns the combined stdout+stderr on failure.
    fn restore(&self, vm_id: &str, work_dir: &Path) -> Result<(), String>;
    /// Kill any host process matching `--id <vmID>` by pattern (spec.md
    /// §4.E step 3, §9 "brittle" caveat).
    fn kill_by_id(&self, vm_id: &str);
    /// Remove the working directory recursively (spec.md §4.E step 3).
    fn remove_work_dir(&self, work_dir: &Path) -> std::io::Result<()> {
        match std::fs::remove_dir_all(work_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

pub struct Reconciler<S: ObjectStore> {
    store: Arc<S>,
    collaborators: Arc<dyn Collaborators>,
    settings: Settings,
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(store: Arc<S>, collaborators: Arc<dyn Collaborators>, settings: Settings) -> Self {
        Self {
            store,
            collaborators,
            settings,
        }
    }

    /// The ten-step algorithm of spec.md §4.E, run for one `(namespace,
    /// name)` key.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Outcome {
        // Step 1: load the object; if not found, return silently.
        let Some(mut workload) = self.store.get(namespace, name).await else {
            return Outcome::Done;
        };

        // Step 2: deterministic paths.
        let work_dir = self.settings.work_dir(namespace, name);
        let vm_id = format!("{namespace}-{name}");

        // Step 3: deletion.
        if workload.deletion_timestamp.is_some() {
            info!(target: "reconcile::Reconciler", "tearing down {namespace}/{name}");
            self.collaborators.kill_by_id(&vm_id);
            if let Err(e) = self.collaborators.remove_work_dir(&work_dir) {
                error!(target: "reconcile::Reconciler", "failed to remove {}: {e}", work_dir.display());
            }
            workload.status.phase = Some(Phase::Stopped);
            workload.finalizers.retain(|f| f != FINALIZER);
            self.store.update(workload).await;
            return Outcome::Done;
        }

        // Step 4: ensure finalizer, persist, and return — the next
        // reconcile continues (spec.md §4.E step 4).
        if !workload.has_finalizer(FINALIZER) {
            workload.finalizers.push(FINALIZER.to_string());
            self.store.update(workload).await;
            return Outcome::Done;
        }

        // Step 5: idempotence short-circuit.
        if workload.status.phase == Some(Phase::Ready)
            && workload.status.snapshot.as_deref() == Some(workload.spec.snapshot.as_str())
        {
            return Outcome::Done;
        }

        // Step 6: Pending.
        workload.status.phase = Some(Phase::Pending);
        self.store.update(workload.clone()).await;

        // Step 7: pull.
        if let Err(e) = self.collaborators.pull(&workload.spec.snapshot, &work_dir) {
            self.record_failure(&mut workload, error::reason::PULL_FAILED, e);
            self.store.update(workload).await;
            return Outcome::Requeue(self.settings.requeue);
        }

        // Step 8: Restoring.
        workload.status.phase = Some(Phase::Restoring);
        self.store.update(workload.clone()).await;

        // Step 9: exec the host shim.
        if let Err(e) = self.collaborators.restore(&vm_id, &work_dir) {
            self.record_failure(&mut workload, error::reason::RESTORE_FAILED, e);
            self.store.update(workload).await;
            return Outcome::Requeue(self.settings.requeue);
        }

        // Step 10: Ready.
        let now = Utc::now();
        workload
            .status
            .conditions
            .push(Condition::ready_true(error::reason::RESTORED, now));
        workload.status.snapshot = Some(workload.spec.snapshot.clone());
        workload.status.phase = Some(Phase::Ready);
        self.store.update(workload).await;

        Outcome::Done
    }

    fn record_failure(&self, workload: &mut Workload, reason: &str, message: String) {
        let now = Utc::now();
        workload
            .status
            .conditions
            .push(Condition::ready_false(reason, message.clone(), now));
        workload.status.phase = Some(Phase::Error);
        error!(target: "reconcile::Reconciler", "{}/{}: {reason}: {message}", workload.namespace, workload.name);
    }
}

/// Event-filter predicate (spec.md §4.E Event filtering): dispatch whenever
/// (a) `generation` changes, (b) a deletion timestamp is set, or (c) the
/// object is removed. Status-only changes do not trigger dispatch.
pub fn should_dispatch(previous_generation: Option<u64>, current: Option<&Workload>) -> bool {
    match current {
        None => true, // (c) removed
        Some(w) => {
            w.deletion_timestamp.is_some() // (b)
                || previous_generation != Some(w.generation) // (a)
        }
    }
}
