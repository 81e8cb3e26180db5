//! Post-build checks and their pass/fail verdict.
//!
//! Checks are independent of each other: every one is evaluated and
//! reported, and the verdict fails if any of them did.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tbe_core::{emit_verification, E2eError, TagPolicy};
use tbe_cosign::AttestationVerifier;
use tbe_forge::{PackageVersion, WorkflowRun};

/// What a check looked at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    RunConclusion,
    ImageTags,
    Attestation { attestation_type: String },
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckKind::RunConclusion => f.write_str("run conclusion"),
            CheckKind::ImageTags => f.write_str("image tags"),
            CheckKind::Attestation { attestation_type } => {
                write!(f, "attestation {attestation_type}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: CheckKind,
    pub passed: bool,
    pub detail: String,
}

impl CheckOutcome {
    fn pass(check: CheckKind, detail: impl Into<String>) -> Self {
        CheckOutcome {
            check,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(check: CheckKind, detail: impl Into<String>) -> Self {
        CheckOutcome {
            check,
            passed: false,
            detail: detail.into(),
        }
    }

    /// A check that could not run because an earlier step did not succeed.
    pub fn skipped(check: CheckKind, reason: &str) -> Self {
        Self::fail(check, format!("skipped: {reason}"))
    }
}

/// The run concluded with `success`.
pub fn check_conclusion(run: &WorkflowRun) -> CheckOutcome {
    let conclusion = run
        .conclusion
        .as_ref()
        .map(|c| c.as_str())
        .unwrap_or("none");
    if run.succeeded() {
        CheckOutcome::pass(CheckKind::RunConclusion, conclusion)
    } else {
        CheckOutcome::fail(
            CheckKind::RunConclusion,
            format!("workflow run {} concluded {conclusion}", run.id),
        )
    }
}

/// The package version carries the tags the policy requires.
pub fn check_tags(policy: &TagPolicy, version: &PackageVersion, merge_sha: &str) -> CheckOutcome {
    let verdict = policy.evaluate(version.tags(), merge_sha);
    let tags = version.tags().join(", ");
    if verdict.passed {
        return CheckOutcome::pass(CheckKind::ImageTags, tags);
    }

    let mut problems = Vec::new();
    if !verdict.missing.is_empty() {
        problems.push(format!("missing {}", verdict.missing.join(", ")));
    }
    if policy.require_commit_tag && verdict.commit_tag.is_none() {
        problems.push(format!("no short commit tag for {merge_sha}"));
    }
    CheckOutcome::fail(
        CheckKind::ImageTags,
        format!("{} (image has: {tags})", problems.join("; ")),
    )
}

/// Verify one attestation type. A non-zero exit and a tool failure are both
/// reported as a failed check.
pub async fn check_attestation(
    verifier: &AttestationVerifier,
    image: &str,
    attestation_type: &str,
) -> CheckOutcome {
    let check = CheckKind::Attestation {
        attestation_type: attestation_type.to_string(),
    };
    match verifier.verify(image, attestation_type).await {
        Ok(outcome) => {
            emit_verification(image, attestation_type, outcome.status);
            if outcome.verified() {
                CheckOutcome::pass(check, "verified")
            } else {
                let err = E2eError::VerificationFailed {
                    attestation_type: attestation_type.to_string(),
                    status: outcome.status,
                    stderr: outcome.stderr.trim().to_string(),
                };
                CheckOutcome::fail(check, err.to_string())
            }
        }
        Err(e) => CheckOutcome::fail(check, E2eError::from(e).to_string()),
    }
}

/// Verify every attestation type concurrently. The verifier's queue runs
/// them one at a time; results come back in `attestation_types` order.
pub async fn check_attestations(
    verifier: &AttestationVerifier,
    image: &str,
    attestation_types: &[String],
) -> Vec<CheckOutcome> {
    join_all(
        attestation_types
            .iter()
            .map(|t| check_attestation(verifier, image, t)),
    )
    .await
}

/// Overall verdict over a set of checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioVerdict {
    pub passed: bool,
    pub violations: Vec<String>,
    pub message: String,
}

impl ScenarioVerdict {
    pub fn evaluate(checks: &[CheckOutcome]) -> Self {
        let violations: Vec<String> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.check, c.detail))
            .collect();

        let passed = !checks.is_empty() && violations.is_empty();
        let message = if passed {
            format!("All {} checks passed", checks.len())
        } else if checks.is_empty() {
            "No checks were evaluated".to_string()
        } else {
            format!("Scenario failed with {} violation(s)", violations.len())
        };

        ScenarioVerdict {
            passed,
            violations,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tbe_forge::fakes::{package_version, workflow_run};

    #[test]
    fn test_conclusion_success_passes() {
        let run = workflow_run(42, "sha1", "completed", Some("success"));
        assert!(check_conclusion(&run).passed);
    }

    #[test]
    fn test_conclusion_failure_names_run() {
        let run = workflow_run(42, "sha1", "completed", Some("failure"));
        let outcome = check_conclusion(&run);
        assert!(!outcome.passed);
        assert!(outcome.detail.contains("42"));
        assert!(outcome.detail.contains("failure"));
    }

    #[test]
    fn test_tags_check_reports_missing() {
        let version = package_version(1, "sha256:deadbeef", &["main"]);
        let outcome = check_tags(&TagPolicy::default(), &version, "a1b2c3d4");
        assert!(!outcome.passed);
        assert!(outcome.detail.contains("missing latest"));
        assert!(outcome.detail.contains("no short commit tag"));
    }

    #[test]
    fn test_tags_check_passes() {
        let version = package_version(1, "sha256:deadbeef", &["main", "latest", "a1b2c3"]);
        let outcome = check_tags(&TagPolicy::default(), &version, "a1b2c3d4");
        assert!(outcome.passed);
    }

    #[test]
    fn test_verdict_collects_every_violation() {
        let checks = vec![
            CheckOutcome::pass(CheckKind::RunConclusion, "success"),
            CheckOutcome::fail(CheckKind::ImageTags, "missing latest"),
            CheckOutcome::fail(
                CheckKind::Attestation {
                    attestation_type: "spdxjson".to_string(),
                },
                "bad signature",
            ),
        ];
        let verdict = ScenarioVerdict::evaluate(&checks);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 2);
        assert!(verdict.violations[1].starts_with("attestation spdxjson"));
    }

    #[test]
    fn test_empty_checks_do_not_pass() {
        assert!(!ScenarioVerdict::evaluate(&[]).passed);
    }
}
