//! Component D — Snapshot Orchestrator (spec.md §4.D): a thin, stateless
//! coordinator composing the registry transport (B) and the hypervisor
//! client (C) into the four higher-level flows the reconciler and the
//! `spore-shim` binary call into. Grounded on
//! `examples/original_source/packages/fc-snapshot-tools/fc.go`'s
//! `StartAndSnapshot`/`PushSnapshot` free functions — this module is their
//! Rust counterpart, generalized behind the injectable `Client`.

use std::path::{Path, PathBuf};

use log::info;

use crate::bundle;
use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::hypervisor::{Client, ClientOptions, NetworkInterfaceConfig, StartConfig};
use crate::registry;

const DEFAULT_MEM_SIZE_MIB: u32 = 1024;
const DEFAULT_VCPU_COUNT: u32 = 1;
const DEFAULT_FC_BIN: &str = "firecracker";
const DEFAULT_JAILER_BIN: &str = "jailer";
const SNAPSHOT_PREFIX: &str = "snapshot";

/// User-facing parameters for `startAndSnapshot`/`restore` (spec.md §4.D).
/// Any field left at its `Default` is filled in with the literal defaults
/// spec.md names: 1024 MiB memory, 1 vCPU, `firecracker`/`jailer` binaries,
/// ID `sporelet-<unix-seconds>`.
#[derive(Default)]
pub struct SnapshotSpec {
    pub kernel_image_path: PathBuf,
    pub boot_args: Option<String>,
    pub rootfs_path: PathBuf,
    pub mem_size_mib: Option<u32>,
    pub vcpu_count: Option<u32>,
    pub fc_bin: Option<String>,
    pub jailer_bin: Option<String>,
    pub socket_path: Option<PathBuf>,
    pub id: Option<String>,
    pub network_interfaces: Vec<NetworkInterfaceConfig>,
}

impl SnapshotSpec {
    fn resolve(&self, now_unix_secs: u64) -> (String, String, u32, u32, Option<String>) {
        let fc_bin = self.fc_bin.clone().unwrap_or_else(|| DEFAULT_FC_BIN.to_string());
        let jailer_bin = self
            .jailer_bin
            .clone()
            .unwrap_or_else(|| DEFAULT_JAILER_BIN.to_string());
        let mem = self.mem_size_mib.unwrap_or(DEFAULT_MEM_SIZE_MIB);
        let vcpu = self.vcpu_count.unwrap_or(DEFAULT_VCPU_COUNT);
        let id = Some(
            self.id
                .clone()
                .unwrap_or_else(|| format!("sporelet-{now_unix_secs}")),
        );
        (fc_bin, jailer_bin, mem, vcpu, id)
    }
}

/// `startAndSnapshot(spec, outDir)` (spec.md §4.D): fill defaults, make
/// `out_dir`, build a client, then `startVM -> waitForHandshake ->
/// createSnapshot` against `snapshot.{mem,vmstate,config}`. Any failure
/// short-circuits and surfaces.
pub async fn start_and_snapshot(
    spec: &SnapshotSpec,
    out_dir: &Path,
    settings: &Settings,
    now_unix_secs: u64,
) -> Result<()> {
    let (fc_bin, jailer_bin, mem, vcpu, id) = spec.resolve(now_unix_secs);

    tokio::fs::create_dir_all(out_dir).await?;

    let mut client = Client::new(
        fc_bin,
        jailer_bin,
        id.unwrap(),
        spec.socket_path.clone(),
        settings,
        ClientOptions::default(),
    )
    .map_err(Error::from)?;

    let start_cfg = StartConfig {
        kernel_image_path: spec.kernel_image_path.clone(),
        boot_args: spec.boot_args.clone(),
        rootfs_path: spec.rootfs_path.clone(),
        rootfs_read_only: false,
        vcpu_count: vcpu,
        mem_size_mib: mem,
        network_interfaces: spec.network_interfaces.clone(),
    };

    info!(target: "orchestrator::start_and_snapshot", "starting vm for snapshot in {}", out_dir.display());
    client.start_vm(&start_cfg).await.map_err(Error::from)?;

    let cancel = CancelToken::new();
    client
        .wait_for_handshake(&cancel)
        .await
        .map_err(Error::from)?;

    let paths = bundle::paths(out_dir, SNAPSHOT_PREFIX);
    client.create_snapshot(&paths).await.map_err(Error::from)?;

    client.cleanup().await;
    Ok(())
}

/// `restore(spec)` (spec.md §4.D): verify all three bundle files exist,
/// build a client, `restoreSnapshot -> waitForHandshake`.
pub async fn restore(
    dir: &Path,
    prefix: &str,
    spec: &SnapshotSpec,
    settings: &Settings,
    now_unix_secs: u64,
) -> Result<()> {
    bundle::ensure_exists(dir, prefix)?;

    let (fc_bin, jailer_bin, mem, vcpu, id) = spec.resolve(now_unix_secs);
    let _ = (mem, vcpu); // restore replays the snapshot's own configuration

    let mut client = Client::new(
        fc_bin,
        jailer_bin,
        id.unwrap(),
        spec.socket_path.clone(),
        settings,
        ClientOptions::default(),
    )
    .map_err(Error::from)?;

    let paths = bundle::paths(dir, prefix);
    info!(target: "orchestrator::restore", "restoring vm {} from {}", client.vm_id(), dir.display());
    client.restore_snapshot(&paths).await.map_err(Error::from)?;

    let cancel = CancelToken::new();
    client
        .wait_for_handshake(&cancel)
        .await
        .map_err(Error::from)?;

    Ok(())
}

/// `pushSnapshot` (spec.md §4.D): delegate to component B after an
/// existence check.
pub fn push_snapshot(dir: &Path, prefix: &str, oci_ref: &str) -> Result<()> {
    bundle::ensure_exists(dir, prefix)?;
    let paths = bundle::paths(dir, prefix);
    registry::push(oci_ref, &paths.mem, &paths.vmstate, &paths.config).map_err(Error::from)
}

/// `pullSnapshot` (spec.md §4.D): delegate to component B; the existence
/// check applies to the destination only after the pull completes (there is
/// nothing to check beforehand).
pub fn pull_snapshot(oci_ref: &str, out_dir: &Path) -> Result<()> {
    registry::pull(oci_ref, out_dir).map_err(Error::from)
}
