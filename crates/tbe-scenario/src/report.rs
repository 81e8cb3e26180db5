//! Scenario report: what was driven, what was observed, and the verdict.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::checks::{CheckOutcome, ScenarioVerdict};
use crate::stage::StageRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scratch branch, the hex millisecond timestamp of the run
    pub branch: String,
    pub owner: String,
    pub repository: String,
    pub merge_sha: String,
    pub run_id: u64,
    pub run_url: Option<String>,
    pub conclusion: Option<String>,
    /// Absent when the run did not succeed
    pub digest: Option<String>,
    pub image: Option<String>,
    pub tags: Vec<String>,
    pub stages: Vec<StageRecord>,
    pub checks: Vec<CheckOutcome>,
    pub verdict: ScenarioVerdict,
    pub duration_ms: u64,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.verdict.passed
    }

    /// Human-readable summary for terminal output.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Scenario {}/{} (branch {})", self.owner, self.repository, self.branch);
        let _ = writeln!(out, "  merge commit: {}", self.merge_sha);
        let _ = writeln!(
            out,
            "  workflow run: {} ({})",
            self.run_id,
            self.conclusion.as_deref().unwrap_or("no conclusion")
        );
        if let Some(url) = &self.run_url {
            let _ = writeln!(out, "    {url}");
        }
        if let Some(image) = &self.image {
            let _ = writeln!(out, "  image: {image}");
            let _ = writeln!(out, "  tags: {}", self.tags.join(", "));
        }

        let _ = writeln!(out, "  stages:");
        for record in &self.stages {
            let _ = writeln!(
                out,
                "    {:<20} {:>8} ms  {}",
                record.stage.name(),
                record.duration_ms,
                if record.success { "ok" } else { "FAILED" }
            );
        }

        let _ = writeln!(out, "  checks:");
        for check in &self.checks {
            let mark = if check.passed { "PASS" } else { "FAIL" };
            let _ = writeln!(out, "    [{mark}] {}: {}", check.check, check.detail);
        }

        let _ = writeln!(out, "{} ({} ms)", self.verdict.message, self.duration_ms);
        out
    }
}
