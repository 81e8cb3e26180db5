//! `cosign verify-attestation` for published images.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::queue::CosignQueue;
use crate::Result;

/// OIDC issuer of GitHub Actions workload identity tokens.
pub const DEFAULT_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// Signing identities of the trusted reusable workflows.
pub const DEFAULT_IDENTITY_REGEXP: &str =
    "^https://github.com/liatrio/gh-trusted-builds-workflows/.github/workflows/.*.yaml@.*";

/// Attestations the build-and-push workflow attaches to every image.
pub const DEFAULT_ATTESTATION_TYPES: [&str; 3] = [
    "spdxjson",
    "https://liatr.io/attestations/github-pull-request/v1",
    "slsaprovenance",
];

/// `<registry>/<owner>/<repository>@<digest>`
pub fn image_reference(registry: &str, owner: &str, repository: &str, digest: &str) -> String {
    format!("{registry}/{owner}/{repository}@{digest}")
}

/// How the signing certificate's identity is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum IdentityMatcher {
    Exact(String),
    Regexp(String),
}

impl IdentityMatcher {
    fn args(&self) -> [String; 2] {
        match self {
            IdentityMatcher::Exact(identity) => {
                ["--certificate-identity".to_string(), identity.clone()]
            }
            IdentityMatcher::Regexp(pattern) => {
                ["--certificate-identity-regexp".to_string(), pattern.clone()]
            }
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            IdentityMatcher::Exact(s) | IdentityMatcher::Regexp(s) => s,
        }
    }
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        IdentityMatcher::Regexp(DEFAULT_IDENTITY_REGEXP.to_string())
    }
}

/// Verification policy shared by every attestation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOptions {
    pub identity: IdentityMatcher,
    pub issuer: String,
    /// Transparency log to query instead of the tool's default
    pub rekor_url: Option<String>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        VerifyOptions {
            identity: IdentityMatcher::default(),
            issuer: DEFAULT_ISSUER.to_string(),
            rekor_url: None,
        }
    }
}

/// Result of verifying one attestation type against one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub image: String,
    pub attestation_type: String,
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl VerificationOutcome {
    /// Exit status 0 is the only success.
    pub fn verified(&self) -> bool {
        self.status == 0
    }
}

/// Verifies attestations through the shared queue.
#[derive(Debug, Clone)]
pub struct AttestationVerifier {
    queue: CosignQueue,
    options: VerifyOptions,
}

impl AttestationVerifier {
    pub fn new(queue: CosignQueue, options: VerifyOptions) -> Self {
        AttestationVerifier { queue, options }
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    /// Arguments for one `verify-attestation` invocation.
    pub fn verify_args(&self, image: &str, attestation_type: &str) -> Vec<String> {
        let mut args = vec!["verify-attestation".to_string()];
        if let Some(rekor) = &self.options.rekor_url {
            args.push("--rekor-url".to_string());
            args.push(rekor.clone());
        }
        args.push("--type".to_string());
        args.push(attestation_type.to_string());
        args.extend(self.options.identity.args());
        args.push("--certificate-oidc-issuer".to_string());
        args.push(self.options.issuer.clone());
        args.push(image.to_string());
        args
    }

    /// Run one verification. A non-zero exit is returned as an outcome, not
    /// an error, and is never retried.
    pub async fn verify(&self, image: &str, attestation_type: &str) -> Result<VerificationOutcome> {
        debug!(image, attestation_type, "Queueing attestation verification");
        let output = self
            .queue
            .run(self.verify_args(image, attestation_type))
            .await?;

        let outcome = VerificationOutcome {
            image: image.to_string(),
            attestation_type: attestation_type.to_string(),
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
        };
        info!(
            attestation_type,
            status = outcome.status,
            verified = outcome.verified(),
            "Attestation verification finished"
        );
        Ok(outcome)
    }
}
