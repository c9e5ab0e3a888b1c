//! The concrete `Collaborators` used outside tests: pull through the
//! orchestrator, restore by executing the host shim binary, and kill a
//! running hypervisor by scanning `/proc` for its `--id` argument.

use std::fs;
use std::path::Path;
use std::process::Command;

use log::{debug, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::config::Settings;
use crate::orchestrator;

use super::Collaborators;

pub struct DefaultCollaborators {
    shim_bin: String,
}

impl DefaultCollaborators {
    pub fn new(settings: &Settings) -> Self {
        Self {
            shim_bin: settings.shim_bin.clone(),
        }
    }
}

impl Collaborators for DefaultCollaborators {
    fn pull(&self, oci_ref: &str, work_dir: &Path) -> Result<(), String> {
        orchestrator::pull_snapshot(oci_ref, work_dir).map_err(|e| e.to_string())
    }

    fn restore(&self, vm_id: &str, work_dir: &Path) -> Result<(), String> {
        debug!(target: "reconcile::collaborators::restore", "{} restore --id {vm_id} {}", self.shim_bin, work_dir.display());
        let output = Command::new(&self.shim_bin)
            .arg("restore")
            .arg("--id")
            .arg(vm_id)
            .arg(work_dir)
            .output()
            .map_err(|e| e.to_string())?;

        if !output.status.success() {
            return Err(format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Ok(())
    }

    /// `/proc/<pid>/cmdline` holds NUL-separated argv; a process started
    /// with `--id <vm_id>` carries `vm_id` as one of those arguments. No
    /// pidfile is kept, so matching the argv is the only handle available
    /// — a real deployment that needs tighter targeting would have the
    /// shim record its own pid.
    fn kill_by_id(&self, vm_id: &str) {
        let Ok(entries) = fs::read_dir("/proc") else {
            return;
        };

        for entry in entries.flatten() {
            let pid: i32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                Some(pid) => pid,
                None => continue,
            };

            let Ok(cmdline) = fs::read(entry.path().join("cmdline")) else {
                continue;
            };
            let args: Vec<&str> = cmdline
                .split(|&b| b == 0)
                .filter_map(|s| std::str::from_utf8(s).ok())
                .collect();

            if args.windows(2).any(|w| w == ["--id", vm_id]) {
                debug!(target: "reconcile::collaborators::kill_by_id", "killing pid {pid} matching --id {vm_id}");
                if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                    warn!(target: "reconcile::collaborators::kill_by_id", "kill({pid}) failed: {e}");
                }
            }
        }
    }
}
