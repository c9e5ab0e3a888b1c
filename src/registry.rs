//! Registry transport: push/pull a snapshot bundle as an OCI artifact.
//!
//! Shells out to `oras`, a content-addressed artifact client, rather than
//! linking an OCI client library directly. The only thing tested here is
//! the argv this crate hands to `Command`, not `oras` itself.

use std::path::Path;
use std::process::Command;

use log::{debug, error};

pub const FIRECRACKER_ARTIFACT_TYPE: &str = "application/vnd.firecracker.layer.v1";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),
    #[error("transport failure running {tool}: {output}")]
    Transport { tool: String, output: String },
    #[error("i/o error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Push the three bundle files as layers of a single artifact tagged
/// `ref`, with artifact-type `application/vnd.firecracker.layer.v1`.
pub fn push(oci_ref: &str, mem: &Path, vmstate: &Path, config: &Path) -> Result<()> {
    which::which("oras")
        .map_err(|_| RegistryError::PrerequisiteMissing("oras not found on PATH".to_string()))?;

    for f in [mem, vmstate, config] {
        if !f.is_file() {
            return Err(RegistryError::NotFound(f.display().to_string()));
        }
    }

    debug!(target: "registry::push", "pushing {oci_ref} from {}, {}, {}", mem.display(), vmstate.display(), config.display());
    let output = Command::new("oras")
        .arg("push")
        .arg(oci_ref)
        .arg("--artifact-type")
        .arg(FIRECRACKER_ARTIFACT_TYPE)
        .arg(mem)
        .arg(vmstate)
        .arg(config)
        .output()
        .map_err(|e| RegistryError::Io(e.to_string()))?;

    if !output.status.success() {
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        error!(target: "registry::push", "oras push {oci_ref} failed: {combined}");
        return Err(RegistryError::Transport {
            tool: "oras".to_string(),
            output: combined,
        });
    }

    Ok(())
}

/// Pull all layers of `ref` into `out_dir`, creating it if absent, and
/// preserving the layers' original file names.
pub fn pull(oci_ref: &str, out_dir: &Path) -> Result<()> {
    which::which("oras")
        .map_err(|_| RegistryError::PrerequisiteMissing("oras not found on PATH".to_string()))?;

    std::fs::create_dir_all(out_dir).map_err(|e| RegistryError::Io(e.to_string()))?;

    debug!(target: "registry::pull", "pulling {oci_ref} into {}", out_dir.display());
    let output = Command::new("oras")
        .arg("pull")
        .arg(oci_ref)
        .arg("--output")
        .arg(out_dir)
        .output()
        .map_err(|e| RegistryError::Io(e.to_string()))?;

    if !output.status.success() {
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        error!(target: "registry::pull", "oras pull {oci_ref} failed: {combined}");
        return Err(RegistryError::Transport {
            tool: "oras".to_string(),
            output: combined,
        });
    }

    Ok(())
}
