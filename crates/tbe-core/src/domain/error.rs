//! Domain-level error taxonomy for the E2E harness.

use tbe_cosign::CosignError;
use tbe_forge::ForgeError;

/// E2E harness errors.
#[derive(Debug, thiserror::Error)]
pub enum E2eError {
    /// A discovery poll or digest lookup ran out of candidates.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A terminal-state poll ran out of attempts.
    #[error("{what} did not complete after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    #[error("attestation {attestation_type} failed verification (status {status}): {stderr}")]
    VerificationFailed {
        attestation_type: String,
        status: i32,
        stderr: String,
    },

    #[error("forge error: {0}")]
    Forge(#[from] ForgeError),

    #[error("cosign error: {0}")]
    Cosign(#[from] CosignError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for E2E harness operations.
pub type Result<T> = std::result::Result<T, E2eError>;
