//! Process lifecycle: spawn via the jailer, wait for the control socket,
//! and teardown. The jailer invocation here is the *default* start hook,
//! not the only one — callers can swap it for a different start sequence.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, error, info};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::HypervisorError;

/// Default start hook: exec the jailer with the standard jail/chroot/exec
/// argv.
pub fn default_jailer_args(hyp_bin: &str, vm_id: &str, socket_path: &PathBuf) -> Vec<String> {
    vec![
        "--id".to_string(),
        vm_id.to_string(),
        "--exec-file".to_string(),
        hyp_bin.to_string(),
        "--uid".to_string(),
        "0".to_string(),
        "--gid".to_string(),
        "0".to_string(),
        "--chroot-base-dir".to_string(),
        "/tmp".to_string(),
        "--".to_string(),
        "--api-sock".to_string(),
        socket_path.display().to_string(),
    ]
}

/// Spawn the jailer/hypervisor pair and retain the child handle. The caller
/// still owns polling for the socket (see [`wait_for_socket`]); this only
/// performs the `exec`.
///
/// Deliberately *not* `kill_on_drop`: a restored microVM must outlive the
/// `Client` handle that restored it — the shim process that called
/// `restoreSnapshot` exits right after, and `kill_on_drop` would SIGKILL
/// the VM it just brought up. Teardown on failure or after snapshotting is
/// always explicit, via [`cleanup`].
pub fn spawn(jailer_bin: &str, args: &[String]) -> Result<Child, HypervisorError> {
    debug!(target: "hypervisor::session::spawn", "{jailer_bin} {}", args.join(" "));
    Command::new(jailer_bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| HypervisorError::LaunchFailed(e.to_string()))
}

/// Poll the socket path at `poll` intervals up to `timeout`. If the
/// subprocess exits during the wait, fail `LaunchFailed` carrying its exit
/// status; if the deadline expires, fail `LaunchTimeout`.
pub async fn wait_for_socket(
    child: &mut Child,
    socket_path: &PathBuf,
    poll: Duration,
    timeout: Duration,
) -> Result<(), HypervisorError> {
    let deadline = Instant::now() + timeout;

    loop {
        if tokio::fs::metadata(socket_path).await.is_ok() {
            debug!(target: "hypervisor::session::wait_for_socket", "socket ready at {}", socket_path.display());
            return Ok(());
        }

        if let Ok(Some(status)) = child.try_wait() {
            error!(target: "hypervisor::session::wait_for_socket", "subprocess exited before creating socket: {status}");
            return Err(HypervisorError::LaunchFailed(format!(
                "subprocess exited before creating control socket: {status}"
            )));
        }

        if Instant::now() >= deadline {
            return Err(HypervisorError::LaunchTimeout);
        }

        tokio::time::sleep(poll).await;
    }
}

/// Terminate the subprocess if still alive. Does not delete the socket file
/// or working directory — those belong to the orchestrator.
pub async fn cleanup(child: &mut Option<Child>) {
    if let Some(mut child) = child.take() {
        if let Ok(None) = child.try_wait() {
            info!(target: "hypervisor::session::cleanup", "killing live hypervisor subprocess");
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_jailer_args_matches_the_spec_literal_invocation() {
        let args = default_jailer_args("/usr/bin/firecracker", "vm-1", &PathBuf::from("/tmp/a/fc.sock"));
        assert_eq!(
            args,
            vec![
                "--id", "vm-1", "--exec-file", "/usr/bin/firecracker", "--uid", "0", "--gid", "0",
                "--chroot-base-dir", "/tmp", "--", "--api-sock", "/tmp/a/fc.sock",
            ]
        );
    }

    // spec.md §4.C Start sequence: the deadline expiring (not the
    // subprocess exiting) is `LaunchTimeout`.
    #[tokio::test]
    async fn wait_for_socket_times_out_when_socket_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("never.sock");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 5")
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let err = wait_for_socket(
            &mut child,
            &socket_path,
            Duration::from_millis(20),
            Duration::from_millis(80),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HypervisorError::LaunchTimeout));

        let _ = child.kill().await;
    }

    // spec.md §4.C Start sequence: the subprocess exiting before the socket
    // appears is `LaunchFailed`, distinct from a plain timeout.
    #[tokio::test]
    async fn wait_for_socket_fails_launch_failed_when_subprocess_exits_early() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("never.sock");
        let mut child = Command::new("sh").arg("-c").arg("exit 1").spawn().unwrap();

        let err = wait_for_socket(
            &mut child,
            &socket_path,
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HypervisorError::LaunchFailed(_)));
    }

    #[tokio::test]
    async fn wait_for_socket_succeeds_once_the_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("appears.sock");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 5")
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let touch_path = socket_path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tokio::fs::write(&touch_path, b"").await.unwrap();
        });

        wait_for_socket(&mut child, &socket_path, Duration::from_millis(10), Duration::from_secs(5))
            .await
            .unwrap();

        let _ = child.kill().await;
    }
}
