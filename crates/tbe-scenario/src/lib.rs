//! TBE Scenario - the build-and-push end-to-end scenario
//!
//! Drives a change through the hosting service and checks what the build
//! pipeline published:
//! - Commits a fixture change on a scratch branch and squash-merges it
//! - Waits for the triggered workflow run and reads its metadata artifact
//! - Checks image tags and verifies attestations with cosign

pub mod checks;
pub mod report;
pub mod scenario;
pub mod stage;

// Re-export key types
pub use checks::{
    check_attestation, check_attestations, check_conclusion, check_tags, CheckKind, CheckOutcome,
    ScenarioVerdict,
};
pub use report::ScenarioReport;
pub use scenario::{hex_timestamp, BuildAndPushScenario};
pub use stage::{Stage, StageRecord};
