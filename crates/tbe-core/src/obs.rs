//! Structured lifecycle events for scenario runs.
//!
//! Every event carries an `event` field so log pipelines can filter on it
//! independently of the message text.

use tracing::{info, warn};

/// RAII guard that enters a scenario-scoped span.
///
/// ```ignore
/// let _span = ScenarioSpan::enter("18b2f9c4a01");
/// // every event below is tagged with branch = "18b2f9c4a01"
/// ```
pub struct ScenarioSpan {
    _span: tracing::span::EnteredSpan,
}

impl ScenarioSpan {
    pub fn enter(branch: &str) -> Self {
        Self {
            _span: scenario_span(branch).entered(),
        }
    }
}

/// The scenario span itself, for attaching to a future with
/// `tracing::Instrument` instead of entering it on the current thread.
pub fn scenario_span(branch: &str) -> tracing::Span {
    tracing::info_span!("tbe.scenario", branch = %branch)
}

pub fn emit_stage_started(stage: &str) {
    info!(event = "stage.started", stage = %stage);
}

/// Emit event: stage finished, with its duration and outcome.
pub fn emit_stage_finished(stage: &str, duration_ms: u64, success: bool) {
    if success {
        info!(event = "stage.finished", stage = %stage, duration_ms, success);
    } else {
        warn!(event = "stage.finished", stage = %stage, duration_ms, success);
    }
}

/// Emit event: an unsatisfied poll attempt.
pub fn emit_poll_attempt(poll: &str, attempt: u32, max_attempts: u32) {
    info!(
        event = "poll.attempt",
        poll = %poll,
        attempt,
        max_attempts,
        "Condition not yet satisfied"
    );
}

/// Emit event: one attestation verification finished.
pub fn emit_verification(image: &str, attestation_type: &str, status: i32) {
    info!(
        event = "attestation.verified",
        image = %image,
        attestation_type = %attestation_type,
        status,
        verified = status == 0,
    );
}

/// Emit event: scenario verdict.
pub fn emit_scenario_finished(branch: &str, duration_ms: u64, passed: bool) {
    info!(
        event = "scenario.finished",
        branch = %branch,
        duration_ms,
        passed,
    );
}
