//! Snapshot bundle layout and content-hash comparator.
//!
//! Pure, filesystem-only logic: name the three sibling files that make up a
//! bundle, rename a freshly written `snapshot.*` triple to its final prefix,
//! and content-hash two bundles against each other. No hypervisor or
//! registry collaborators are touched here.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BundleError {
    fn from(e: std::io::Error) -> Self {
        BundleError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;

/// The three sibling file names that make up one bundle, keyed by `prefix`.
pub struct Paths {
    pub mem: PathBuf,
    pub vmstate: PathBuf,
    pub config: PathBuf,
}

/// Pure path composition: `paths(dir, prefix) -> (mem, vmstate, config)`.
pub fn paths(dir: &Path, prefix: &str) -> Paths {
    Paths {
        mem: dir.join(format!("{prefix}.mem")),
        vmstate: dir.join(format!("{prefix}.vmstate")),
        config: dir.join(format!("{prefix}.config")),
    }
}

/// Atomically rename the three default-named `snapshot.*` outputs to a
/// chosen `prefix`. If any rename fails the remaining renames are skipped
/// and the error is surfaced.
pub fn rename(dir: &Path, from: &str, to: &str) -> Result<()> {
    let src = paths(dir, from);
    let dst = paths(dir, to);
    for (s, d) in [
        (&src.mem, &dst.mem),
        (&src.vmstate, &dst.vmstate),
        (&src.config, &dst.config),
    ] {
        debug!(target: "bundle::rename", "renaming {} -> {}", s.display(), d.display());
        std::fs::rename(s, d).map_err(|e| {
            BundleError::Io(format!("rename {} -> {}: {e}", s.display(), d.display()))
        })?;
    }
    Ok(())
}

/// For each of the three file names, content-hash both sides with SHA-256
/// and compare; return the filenames that differ. Fails with `NotFound` if
/// any of the six files is missing.
pub fn diff(base_dir: &Path, new_dir: &Path, prefix: &str) -> Result<Vec<String>> {
    let base = paths(base_dir, prefix);
    let new = paths(new_dir, prefix);
    let mut changed = Vec::new();

    for (name, base_path, new_path) in [
        (format!("{prefix}.mem"), &base.mem, &new.mem),
        (format!("{prefix}.vmstate"), &base.vmstate, &new.vmstate),
        (format!("{prefix}.config"), &base.config, &new.config),
    ] {
        let base_hash = hash_file(base_path)?;
        let new_hash = hash_file(new_path)?;
        if base_hash != new_hash {
            changed.push(name);
        }
    }

    if changed.is_empty() {
        debug!(target: "bundle::diff", "prefix {prefix} identical across {} and {}", base_dir.display(), new_dir.display());
    } else {
        warn!(target: "bundle::diff", "prefix {prefix} changed files: {changed:?}");
    }

    Ok(changed)
}

fn hash_file(path: &Path) -> Result<[u8; 32]> {
    let bytes = std::fs::read(path)
        .map_err(|_| BundleError::NotFound(path.display().to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hasher.finalize().into())
}

/// A bundle is valid iff its three files co-exist.
pub fn exists(dir: &Path, prefix: &str) -> bool {
    let p = paths(dir, prefix);
    p.mem.is_file() && p.vmstate.is_file() && p.config.is_file()
}

/// Check that the bundle at `dir`/`prefix` is present, surfacing `NotFound`
/// naming the first missing file (used by the orchestrator before restore
/// and before push).
pub fn ensure_exists(dir: &Path, prefix: &str) -> Result<()> {
    let p = paths(dir, prefix);
    for f in [&p.mem, &p.vmstate, &p.config] {
        if !f.is_file() {
            return Err(BundleError::NotFound(f.display().to_string()));
        }
    }
    Ok(())
}
