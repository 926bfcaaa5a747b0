use std::path::PathBuf;

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while loading artifacts or talking to a vendor driver.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// No binary exists under any of the fallback extensions.
    #[snafu(display("kernel binary not found: {}/{entry}", dir.display()))]
    ArtifactNotFound { dir: PathBuf, entry: String },

    /// The artifact exists but cannot be used as-is.
    #[snafu(display("invalid artifact {}: {reason}", path.display()))]
    InvalidArtifact { path: PathBuf, reason: String },

    /// The metadata record is missing or malformed.
    #[snafu(display("bad kernel metadata {}: {reason}", path.display()))]
    Metadata { path: PathBuf, reason: String },

    /// The artifact targets a different device architecture.
    #[snafu(display(
        "compute architecture mismatch: device has sm_{actual}, kernel requires sm_{expected}"
    ))]
    ArchMismatch { expected: u32, actual: u32 },

    /// Requested shared memory exceeds the device's opt-in maximum.
    #[snafu(display(
        "requested shared memory ({requested} bytes) exceeds device maximum ({limit} bytes)"
    ))]
    ResourceLimitExceeded { requested: u32, limit: u32 },

    /// The vendor driver failed during module load or registration.
    #[snafu(display("driver load failed: {reason}"))]
    DriverLoad { reason: String },

    /// The vendor driver rejected a kernel launch.
    #[snafu(display("kernel launch failed: {reason}"))]
    KernelLaunch { reason: String },

    #[snafu(display("io error on {}: {source}", path.display()))]
    Io { path: PathBuf, source: std::io::Error },
}
