//! Scenario stage definitions and timing records.

use serde::{Deserialize, Serialize};

/// Setup stages, in execution order. The first failure aborts the scenario.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Configured owner, else the authenticated login
    ResolveOwner,
    /// Head SHA of the base branch
    GetBaseBranch,
    CreateBranch,
    /// Rewrite the fixture file on the scratch branch
    UpdateFixture,
    OpenPullRequest,
    MergePullRequest,
    DeleteBranch,
    /// Discovery poll for the run triggered by the merge
    DiscoverRun,
    /// Terminal-state poll
    AwaitCompletion,
    FetchMetadata,
    /// Digest-lookup scan over package versions
    FindPackage,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::ResolveOwner,
        Stage::GetBaseBranch,
        Stage::CreateBranch,
        Stage::UpdateFixture,
        Stage::OpenPullRequest,
        Stage::MergePullRequest,
        Stage::DeleteBranch,
        Stage::DiscoverRun,
        Stage::AwaitCompletion,
        Stage::FetchMetadata,
        Stage::FindPackage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::ResolveOwner => "resolve_owner",
            Stage::GetBaseBranch => "get_base_branch",
            Stage::CreateBranch => "create_branch",
            Stage::UpdateFixture => "update_fixture",
            Stage::OpenPullRequest => "open_pull_request",
            Stage::MergePullRequest => "merge_pull_request",
            Stage::DeleteBranch => "delete_branch",
            Stage::DiscoverRun => "discover_run",
            Stage::AwaitCompletion => "await_completion",
            Stage::FetchMetadata => "fetch_metadata",
            Stage::FindPackage => "find_package",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Timing and outcome of one executed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}
