//! TBE Cosign: attestation verification through the `cosign` CLI
//!
//! Every invocation of the tool in a process goes through one [`CosignQueue`],
//! so verifications and trust-root initialization never overlap. The tool
//! keeps its trust material under `$HOME/.sigstore`, which is shared mutable
//! state; running one invocation at a time is what keeps it consistent.
//!
//! ## Key Components
//!
//! - `CosignQueue`: single worker task, unbounded input, one reply per request
//! - `AttestationVerifier`: builds `verify-attestation` arguments and reports
//!   a `VerificationOutcome` per attestation type
//! - `TrustConfig`: backs up `~/.sigstore`, initializes a custom trust root and
//!   restores the backup on every exit path

mod error;
pub mod queue;
pub mod trust;
pub mod verify;

pub use error::CosignError;
pub use queue::{is_cosign_available, CosignQueue, CosignTool, ToolOutput, DEFAULT_PROGRAM};
pub use trust::{TrustConfig, TrustSettings};
pub use verify::{
    image_reference, AttestationVerifier, IdentityMatcher, VerificationOutcome, VerifyOptions,
    DEFAULT_ATTESTATION_TYPES, DEFAULT_IDENTITY_REGEXP, DEFAULT_ISSUER,
};

/// Result type for cosign operations
pub type Result<T> = std::result::Result<T, CosignError>;
