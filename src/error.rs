//! Crate-wide error taxonomy.
//!
//! Each subsystem (`bundle`, `registry`, `hypervisor`) keeps a narrower error
//! enum of its own. Those fold into [`Error`] at the boundary the
//! reconciler consumes.

use crate::{bundle::BundleError, hypervisor::HypervisorError, registry::RegistryError};

/// The crate-wide error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("transport failure running {tool}: {output}")]
    Transport { tool: String, output: String },

    #[error("hypervisor api error: {status} {body}")]
    Api { status: u16, body: String },

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("launch timed out waiting for control socket")]
    LaunchTimeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BundleError> for Error {
    fn from(e: BundleError) -> Self {
        match e {
            BundleError::NotFound(s) => Error::NotFound(s),
            BundleError::Io(s) => Error::Internal(s),
        }
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(s) => Error::NotFound(s),
            RegistryError::PrerequisiteMissing(s) => Error::PrerequisiteMissing(s),
            RegistryError::Transport { tool, output } => Error::Transport { tool, output },
            RegistryError::Io(s) => Error::Internal(s),
        }
    }
}

impl From<HypervisorError> for Error {
    fn from(e: HypervisorError) -> Self {
        match e {
            HypervisorError::Api { status, body } => Error::Api { status, body },
            HypervisorError::LaunchFailed(s) => Error::LaunchFailed(s),
            HypervisorError::LaunchTimeout => Error::LaunchTimeout,
            HypervisorError::Cancelled => Error::Cancelled,
            HypervisorError::Serde(e) => Error::Internal(e.to_string()),
            HypervisorError::Io(s) => Error::Internal(s),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

/// Condition reason strings the reconciler attaches to failed attempts.
/// Kept as a small namespace rather than an enum since they round-trip
/// through `Condition.reason` as plain strings on the wire.
pub mod reason {
    pub const PULL_FAILED: &str = "PullFailed";
    pub const RESTORE_FAILED: &str = "RestoreFailed";
    pub const RESTORED: &str = "Restored";
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
