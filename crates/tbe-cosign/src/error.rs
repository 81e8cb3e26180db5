//! Error types for tbe-cosign

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while driving the cosign tool.
///
/// A verification that runs and exits non-zero is not an error here; it is
/// reported through `VerificationOutcome`.
#[derive(Error, Debug)]
pub enum CosignError {
    /// Tool binary could not be found
    #[error("cosign is not installed or not in PATH: {0}")]
    NotFound(String),

    /// Tool could not be started for another reason
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A setup command (not a verification) exited non-zero
    #[error("cosign {command} exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// A backup or marker from an earlier bootstrap was never cleaned up
    #[error("Leftover from an earlier trust bootstrap at {0}; run `tbe trust reset` first")]
    StaleBackup(PathBuf),

    /// The worker task is gone
    #[error("cosign queue is closed")]
    QueueClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
