//! The `HostingApi` trait: one async method per remote action.
//!
//! Implementations are direct pass-throughs. They do not retry, cache or
//! reinterpret failures; a non-2xx answer or a transport error is returned to
//! the caller unchanged. In-memory fakes live in [`crate::fakes`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::*;
use crate::Result;

/// `owner/name` of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        RepoRef {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Owner of a container package (user account or organization).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageOwner {
    pub kind: OwnerKind,
    pub name: String,
}

impl PackageOwner {
    pub fn new(kind: OwnerKind, name: impl Into<String>) -> Self {
        PackageOwner {
            kind,
            name: name.into(),
        }
    }
}

/// Remote operations against the source hosting service.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Login of the identity the client authenticates as.
    async fn authenticated_user(&self) -> Result<User>;

    async fn get_branch(&self, repo: &RepoRef, branch: &str) -> Result<Branch>;

    /// Create `refs/heads/{branch}` pointing at `sha`.
    async fn create_ref(&self, repo: &RepoRef, branch: &str, sha: &str) -> Result<GitRef>;

    /// Delete `refs/heads/{branch}`.
    async fn delete_ref(&self, repo: &RepoRef, branch: &str) -> Result<()>;

    /// Read a file; `git_ref = None` reads the default branch.
    async fn get_content(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<ContentFile>;

    /// Create or replace a file, producing a commit.
    async fn put_content(
        &self,
        repo: &RepoRef,
        path: &str,
        update: &ContentUpdate,
    ) -> Result<ContentWrite>;

    async fn create_pull_request(&self, repo: &RepoRef, pr: &NewPullRequest)
        -> Result<PullRequest>;

    async fn merge_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
        merge: &MergeRequest,
    ) -> Result<MergeResult>;

    /// List runs of `workflow` (file name or numeric id), most recent first.
    async fn list_workflow_runs(
        &self,
        repo: &RepoRef,
        workflow: &str,
        filter: &RunFilter,
    ) -> Result<WorkflowRunList>;

    async fn get_workflow_run(&self, repo: &RepoRef, run_id: u64) -> Result<WorkflowRun>;

    async fn list_run_artifacts(&self, repo: &RepoRef, run_id: u64) -> Result<ArtifactList>;

    /// Raw zip archive bytes of an artifact.
    async fn download_artifact(&self, repo: &RepoRef, artifact_id: u64) -> Result<Vec<u8>>;

    /// One page (1-based) of versions of a container package.
    async fn list_package_versions(
        &self,
        owner: &PackageOwner,
        package: &str,
        page: u32,
    ) -> Result<Page<PackageVersion>>;
}
