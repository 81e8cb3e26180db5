//! TBE Forge: GitHub REST adapter for the trusted-builds E2E harness
//!
//! This crate is the remote query layer. Every operation the harness needs
//! from the hosting service (branches, refs, file contents, pull requests,
//! workflow runs, artifacts, container package versions) is a single
//! pass-through call on the [`HostingApi`] trait.
//!
//! ## Layer 0 - Remote Queries
//!
//! Focus: typed request/response shapes. No retries and no caching; those
//! belong to the convergence poller in `tbe-core`.
//!
//! ## Key Components
//!
//! - `HostingApi`: async trait, one method per remote action
//! - `GitHubClient`: reqwest implementation (token or GitHub App auth)
//! - `package_version_pages`: lazy page stream over package versions
//! - `read_metadata_archive`: decodes the workflow metadata zip artifact
//! - `fakes::MemoryForge`: scripted in-memory implementation for tests

pub mod api;
pub mod artifact;
pub mod auth;
mod error;
pub mod fakes;
pub mod github;
pub mod pages;
pub mod types;

pub use api::{HostingApi, PackageOwner, RepoRef};
pub use artifact::read_metadata_archive;
pub use auth::{AppCredentials, Credentials};
pub use error::ForgeError;
pub use github::{GitHubClient, GitHubConfig, DEFAULT_API_URL};
pub use pages::package_version_pages;
pub use types::{
    Artifact, ArtifactList, Branch, CommitRef, ContentFile, ContentUpdate, ContentWrite, GitRef,
    MergeMethod, MergeRequest, MergeResult, NewPullRequest, OwnerKind, Page, PackageVersion,
    PullRequest, RunConclusion, RunFilter, RunMetadata, RunStatus, User, WorkflowRun,
    WorkflowRunList,
};

/// Result type for forge operations
pub type Result<T> = std::result::Result<T, ForgeError>;
