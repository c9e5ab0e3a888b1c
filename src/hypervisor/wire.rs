//! JSON payload shapes for the hypervisor REST calls: boot source, root
//! drive, machine configuration, network interfaces, instance actions, and
//! snapshot create/load. No mmds, balloon, CPU-template, or rate-limiter
//! fields — this system never puts them on the wire.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `PUT /boot-source` body.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BootSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_args: Option<String>,
    pub kernel_image_path: PathBuf,
}

/// `PUT /drives/rootfs` body.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Drive {
    pub drive_id: String,
    pub path_on_host: PathBuf,
    pub is_root_device: bool,
    pub is_read_only: bool,
}

/// `PUT /machine-config` body.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MachineConfiguration {
    pub vcpu_count: u32,
    pub mem_size_mib: u32,
}

/// `PUT /network-interfaces/eth<i>` body.
///
/// The IP/mask/gateway the caller supplies in `NetConfig` are not part of
/// this payload — only `iface_id`, `host_dev_name`, `guest_mac` ride on the
/// wire.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NetworkInterface {
    pub iface_id: String,
    pub host_dev_name: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_mac: Option<String>,
}

/// `PUT /actions` body.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "action_type")]
pub enum InstanceActionInfo {
    InstanceStart,
}

/// `PUT /snapshot/create` body.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SnapshotCreateParams {
    pub mem_file_path: PathBuf,
    pub snapshot_type: String,
    pub snapshot_path: PathBuf,
    pub version: String,
}

/// `PUT /snapshot/load` body.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SnapshotLoadParams {
    pub snapshot_path: PathBuf,
    pub mem_file_path: PathBuf,
    pub resume_vm: bool,
}

/// The composed config document `createSnapshot` writes to the `.config`
/// file: exactly the keys `machine-config`, `boot-source`, `rootfs`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ComposedConfig {
    #[serde(rename = "machine-config")]
    pub machine_config: serde_json::Value,
    #[serde(rename = "boot-source")]
    pub boot_source: serde_json::Value,
    pub rootfs: serde_json::Value,
}

/// A network interface as configured by the caller of `startVM`. The
/// IP/mask/gateway fields are accepted for callers that need them for
/// their own bookkeeping but are deliberately not serialized onto the
/// wire; see [`NetworkInterface`]'s doc comment.
#[derive(Debug, Clone, Default)]
pub struct NetConfig {
    pub host_dev_name: PathBuf,
    pub guest_mac: Option<String>,
    pub ip_addr: Option<String>,
    pub mask: Option<String>,
    pub gateway: Option<String>,
}

impl From<&NetConfig> for NetworkInterface {
    fn from(n: &NetConfig) -> Self {
        NetworkInterface {
            iface_id: String::new(), // filled in by the caller with the index
            host_dev_name: n.host_dev_name.clone(),
            guest_mac: n.guest_mac.clone(),
        }
    }
}
