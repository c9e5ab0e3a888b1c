//! Ambient configuration layer.
//!
//! `Settings` collects the environment-driven knobs the rest of the crate
//! needs defaults for: working-directory root, requeue interval, binary
//! paths, and poll/timeout durations.

use std::env;
use std::time::Duration;

/// Default root for per-workload working directories.
pub const DEFAULT_ROOT: &str = "/var/lib/sporelet";
/// Default requeue interval after a failed pull or restore.
pub const DEFAULT_REQUEUE_SECS: u64 = 60;
pub const DEFAULT_FC_BIN: &str = "firecracker";
pub const DEFAULT_JAILER_BIN: &str = "jailer";
pub const DEFAULT_SHIM_BIN: &str = "spore-shim";
/// Socket-wait poll interval during VM start.
pub const DEFAULT_SOCKET_POLL_MS: u64 = 100;
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 10;
/// vsock readiness poll interval during the guest handshake.
pub const DEFAULT_VSOCK_POLL_MS: u64 = 100;

/// Finalizer string the reconciler attaches to workloads it manages.
pub const FINALIZER: &str = "sporelet.ai/cleanup";

#[derive(Debug, Clone)]
pub struct Settings {
    pub root: String,
    pub requeue: Duration,
    pub fc_bin: String,
    pub jailer_bin: String,
    pub shim_bin: String,
    pub socket_poll: Duration,
    pub socket_timeout: Duration,
    pub vsock_poll: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            requeue: Duration::from_secs(DEFAULT_REQUEUE_SECS),
            fc_bin: DEFAULT_FC_BIN.to_string(),
            jailer_bin: DEFAULT_JAILER_BIN.to_string(),
            shim_bin: DEFAULT_SHIM_BIN.to_string(),
            socket_poll: Duration::from_millis(DEFAULT_SOCKET_POLL_MS),
            socket_timeout: Duration::from_secs(DEFAULT_SOCKET_TIMEOUT_SECS),
            vsock_poll: Duration::from_millis(DEFAULT_VSOCK_POLL_MS),
        }
    }
}

impl Settings {
    /// Load overrides from the environment, falling back to the spec's
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            root: env::var("SPORELET_ROOT").unwrap_or(defaults.root),
            requeue: env::var("SPORELET_REQUEUE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.requeue),
            fc_bin: env::var("SPORELET_FC_BIN").unwrap_or(defaults.fc_bin),
            jailer_bin: env::var("SPORELET_JAILER_BIN").unwrap_or(defaults.jailer_bin),
            shim_bin: env::var("SPORELET_SHIM_BIN").unwrap_or(defaults.shim_bin),
            socket_poll: env::var("SPORELET_SOCKET_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.socket_poll),
            socket_timeout: env::var("SPORELET_SOCKET_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.socket_timeout),
            vsock_poll: env::var("SPORELET_VSOCK_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.vsock_poll),
        }
    }

    /// Deterministic per-workload working directory.
    pub fn work_dir(&self, namespace: &str, name: &str) -> std::path::PathBuf {
        std::path::Path::new(&self.root).join(namespace).join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.root, "/var/lib/sporelet");
        assert_eq!(s.requeue, Duration::from_secs(60));
        assert_eq!(s.fc_bin, "firecracker");
        assert_eq!(s.jailer_bin, "jailer");
    }

    #[test]
    fn work_dir_is_namespace_name_joined_to_root() {
        let s = Settings::default();
        assert_eq!(
            s.work_dir("ns", "sp"),
            std::path::PathBuf::from("/var/lib/sporelet/ns/sp")
        );
    }
}
