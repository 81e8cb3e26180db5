//! Error types for tbe-forge

use thiserror::Error;

/// Errors returned by the hosting API adapter.
///
/// Transport and status failures are surfaced exactly as the remote reported
/// them; callers decide whether an operation is retried.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Network-level failure (connect, TLS, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-2xx response
    #[error("{method} {path} returned {status}: {message}")]
    Status {
        status: u16,
        method: String,
        path: String,
        message: String,
    },

    /// Response body did not match the expected shape
    #[error("Failed to decode response from {path}: {reason}")]
    Decode { path: String, reason: String },

    /// Credentials could not be turned into a bearer token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Artifact archive could not be read
    #[error("Artifact archive error: {0}")]
    Archive(String),

    /// Metadata document inside the artifact is not valid JSON
    #[error("Invalid metadata document: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl ForgeError {
    /// HTTP status code, when the failure was a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ForgeError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the remote answered 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<reqwest::Error> for ForgeError {
    fn from(err: reqwest::Error) -> Self {
        ForgeError::Http(err.to_string())
    }
}

impl From<zip::result::ZipError> for ForgeError {
    fn from(err: zip::result::ZipError) -> Self {
        ForgeError::Archive(err.to_string())
    }
}
