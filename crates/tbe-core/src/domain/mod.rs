//! Domain models for the E2E harness.
//!
//! The remote shapes (`WorkflowRun`, `PackageVersion`, `RunMetadata`) live in
//! `tbe-forge`; this module holds the error taxonomy shared by every layer
//! above it.

pub mod error;

pub use error::{E2eError, Result};
