//! The typed error taxonomy named in the design's error-handling
//! section. Most fallible functions in this crate return
//! `anyhow::Result` for easy `?`-propagation and context chaining; a
//! stage raises one of these variants (wrapped into the `anyhow::Error`
//! via `Into`) when the failure is a named, unrecoverable condition a
//! caller might want to match on with `.downcast_ref::<GatorError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatorError {
    /// Missing required config, invalid plugin name, bad environment.
    #[error("configuration error: {0}")]
    Config(String),

    /// Block-device allocation failure.
    #[error("device allocation error: {0}")]
    Device(String),

    /// Attach/detach/resize/size-limit failure.
    #[error("volume error: {0}")]
    Volume(String),

    /// Package-manager failure, including the aptitude version-mismatch subkind.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Snapshot/bundle/upload/register/tag failure.
    #[error("finalize error: {0}")]
    Finalize(String),

    /// A child process was killed after exceeding its configured timeout.
    #[error("command timed out: {0}")]
    CommandTimeout(String),

    /// Provider API error, generally only surfaced once retries are exhausted.
    #[error("cloud provider error: {0}")]
    Cloud(String),
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provisioning failed: {0}")]
    Generic(String),

    /// The Aptitude provisioner variant double-checks the installed
    /// version against the requested one after `dpkg -i` + `aptitude
    /// install`; a mismatch is unrecoverable, not a transient failure.
    #[error("package install mismatch: requested {requested}, installed {installed}")]
    PackageInstallMismatch { requested: String, installed: String },
}
