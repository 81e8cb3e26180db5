//! The three waits of the build-and-push scenario, built on [`poll_until`]
//! and [`find_in_pages`].

use tbe_forge::{
    package_version_pages, read_metadata_archive, ForgeError, HostingApi, PackageOwner,
    PackageVersion, RepoRef, RunFilter, RunMetadata, WorkflowRun,
};
use tracing::{debug, info};

use crate::config::WorkflowConfig;
use crate::delay::Delay;
use crate::domain::{E2eError, Result};
use crate::poll::{poll_until, PollError, PollPolicy};
use crate::scan::find_in_pages;

/// Discovery poll: the first run of the workflow triggered for `head_sha`.
///
/// Listing errors are logged and retried within the attempt bound.
pub async fn find_run_for_commit<A>(
    api: &A,
    repo: &RepoRef,
    workflow: &WorkflowConfig,
    head_sha: &str,
    policy: &PollPolicy,
    delay: &Delay,
) -> Result<WorkflowRun>
where
    A: HostingApi + ?Sized,
{
    let filter = RunFilter::for_commit(head_sha, &workflow.event);
    let filter = &filter;

    let result = poll_until("workflow_run_discovery", policy, delay, move |_| async move {
        let list = api.list_workflow_runs(repo, &workflow.file, filter).await?;
        Ok::<_, ForgeError>(list.workflow_runs.into_iter().next())
    })
    .await;

    match result {
        Ok(run) => {
            info!(run_id = run.id, head_sha, workflow = %workflow.file, "Found workflow run");
            Ok(run)
        }
        Err(PollError::Exhausted { attempts }) => Err(E2eError::NotFound {
            what: format!(
                "{} run for commit {} (after {} attempts)",
                workflow.file, head_sha, attempts
            ),
        }),
        Err(PollError::Probe(e)) => Err(e.into()),
        Err(PollError::Cancelled) => Err(E2eError::Cancelled),
    }
}

/// Terminal-state poll: fetch `run_id` until its status is `completed`.
///
/// A failed fetch ends the wait with that error.
pub async fn wait_for_run_completion<A>(
    api: &A,
    repo: &RepoRef,
    run_id: u64,
    policy: &PollPolicy,
    delay: &Delay,
) -> Result<WorkflowRun>
where
    A: HostingApi + ?Sized,
{
    let result = poll_until("workflow_run_completion", policy, delay, move |attempt| async move {
        let run = api.get_workflow_run(repo, run_id).await?;
        if run.status.is_terminal() {
            Ok::<_, ForgeError>(Some(run))
        } else {
            debug!(run_id, status = %run.status, attempt, "Waiting for workflow run to complete");
            Ok(None)
        }
    })
    .await;

    match result {
        Ok(run) => {
            info!(
                run_id,
                conclusion = run.conclusion.as_ref().map(|c| c.as_str()),
                "Workflow run completed"
            );
            Ok(run)
        }
        Err(PollError::Exhausted { attempts }) => Err(E2eError::Timeout {
            what: format!("workflow run {run_id}"),
            attempts,
        }),
        Err(PollError::Probe(e)) => Err(e.into()),
        Err(PollError::Cancelled) => Err(E2eError::Cancelled),
    }
}

/// Download and decode the metadata artifact of a completed run.
pub async fn fetch_run_metadata<A>(
    api: &A,
    repo: &RepoRef,
    run_id: u64,
    workflow: &WorkflowConfig,
) -> Result<RunMetadata>
where
    A: HostingApi + ?Sized,
{
    let artifacts = api.list_run_artifacts(repo, run_id).await?;
    let artifact = artifacts
        .artifacts
        .iter()
        .find(|a| a.name == workflow.metadata_artifact)
        .ok_or_else(|| E2eError::NotFound {
            what: format!(
                "artifact '{}' on workflow run {}",
                workflow.metadata_artifact, run_id
            ),
        })?;

    let archive = api.download_artifact(repo, artifact.id).await?;
    let metadata = read_metadata_archive(&archive, &workflow.metadata_entry)?;
    info!(run_id, digest = %metadata.digest, "Fetched run metadata");
    Ok(metadata)
}

/// Digest-lookup scan: the package version whose name is `digest`.
///
/// Pages are requested in order and the scan stops on the first match.
pub async fn find_package_version_by_digest<A>(
    api: &A,
    owner: &PackageOwner,
    package: &str,
    digest: &str,
) -> Result<PackageVersion>
where
    A: HostingApi + ?Sized,
{
    let pages = package_version_pages(api, owner, package);
    let found = find_in_pages(pages, |version: &PackageVersion| version.name == digest).await?;

    match found {
        Some(version) => {
            info!(digest, version_id = version.id, tags = ?version.tags(), "Found package version");
            Ok(version)
        }
        None => Err(E2eError::NotFound {
            what: format!("package version {digest} of {}/{package}", owner.name),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tbe_forge::fakes::{metadata_archive, package_version, workflow_run, MemoryForge};
    use tbe_forge::OwnerKind;

    fn repo() -> RepoRef {
        RepoRef::new("octocat", "fixture")
    }

    fn fast(max_attempts: u32, retry_on_error: bool) -> PollPolicy {
        PollPolicy::new(max_attempts, Duration::from_secs(1), retry_on_error)
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_takes_first_run_once_listed() {
        let forge = MemoryForge::new();
        forge.push_run_listing(vec![]);
        forge.push_run_listing(vec![]);
        forge.push_run_listing(vec![
            workflow_run(42, "sha1", "queued", None),
            workflow_run(41, "sha1", "queued", None),
        ]);

        let run = find_run_for_commit(
            &forge,
            &repo(),
            &WorkflowConfig::default(),
            "sha1",
            &fast(10, true),
            &Delay::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.id, 42);
        assert_eq!(forge.call_count("list_workflow_runs"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_tolerates_listing_errors() {
        let forge = MemoryForge::new();
        forge.fail_next("list_workflow_runs", 502);
        forge.push_run_listing(vec![workflow_run(42, "sha1", "queued", None)]);

        let run = find_run_for_commit(
            &forge,
            &repo(),
            &WorkflowConfig::default(),
            "sha1",
            &fast(10, true),
            &Delay::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.id, 42);
        assert_eq!(forge.call_count("list_workflow_runs"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_exhaustion_is_not_found() {
        let forge = MemoryForge::new();

        let err = find_run_for_commit(
            &forge,
            &repo(),
            &WorkflowConfig::default(),
            "sha1",
            &fast(10, true),
            &Delay::new(),
        )
        .await
        .unwrap_err();

        match err {
            E2eError::NotFound { what } => {
                assert!(what.contains("build-and-push.yaml"));
                assert!(what.contains("sha1"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert_eq!(forge.call_count("list_workflow_runs"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_returns_terminal_run() {
        let forge = MemoryForge::new();
        forge.push_run_state(workflow_run(42, "sha1", "queued", None));
        forge.push_run_state(workflow_run(42, "sha1", "in_progress", None));
        forge.push_run_state(workflow_run(42, "sha1", "completed", Some("success")));

        let run = wait_for_run_completion(&forge, &repo(), 42, &fast(30, false), &Delay::new())
            .await
            .unwrap();

        assert!(run.succeeded());
        assert_eq!(forge.call_count("get_workflow_run"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_timeout_names_run() {
        let forge = MemoryForge::new();
        forge.push_run_state(workflow_run(42, "sha1", "in_progress", None));

        let err = wait_for_run_completion(&forge, &repo(), 42, &fast(30, false), &Delay::new())
            .await
            .unwrap_err();

        assert!(matches!(err, E2eError::Timeout { attempts: 30, .. }));
        assert!(err.to_string().contains("42"));
        assert_eq!(forge.call_count("get_workflow_run"), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_fetch_error_propagates() {
        let forge = MemoryForge::new();
        forge.push_run_state(workflow_run(42, "sha1", "queued", None));
        forge.fail_next("get_workflow_run", 500);

        let err = wait_for_run_completion(&forge, &repo(), 42, &fast(30, false), &Delay::new())
            .await
            .unwrap_err();

        match err {
            E2eError::Forge(inner) => assert_eq!(inner.status(), Some(500)),
            other => panic!("expected forge error, got {other:?}"),
        }
        assert_eq!(forge.call_count("get_workflow_run"), 1);
    }

    #[tokio::test]
    async fn test_fetch_run_metadata_reads_digest() {
        let forge = MemoryForge::new();
        forge.add_artifact(42, "sbom", metadata_archive("sha256:wrong"));
        forge.add_artifact(42, "workflow-metadata", metadata_archive("sha256:deadbeef"));

        let meta = fetch_run_metadata(&forge, &repo(), 42, &WorkflowConfig::default())
            .await
            .unwrap();

        assert_eq!(meta.digest, "sha256:deadbeef");
    }

    #[tokio::test]
    async fn test_fetch_run_metadata_missing_artifact() {
        let forge = MemoryForge::new();
        let err = fetch_run_metadata(&forge, &repo(), 42, &WorkflowConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::NotFound { .. }));
        assert_eq!(forge.call_count("download_artifact"), 0);
    }

    #[tokio::test]
    async fn test_digest_scan_stops_on_matching_page() {
        let forge = MemoryForge::new();
        forge.set_package_pages(vec![
            vec![package_version(1, "sha256:01", &["v1"])],
            vec![package_version(2, "sha256:deadbeef", &["main", "latest"])],
            vec![package_version(3, "sha256:03", &[])],
        ]);
        let owner = PackageOwner::new(OwnerKind::User, "octocat");

        let version = find_package_version_by_digest(&forge, &owner, "fixture", "sha256:deadbeef")
            .await
            .unwrap();

        assert_eq!(version.id, 2);
        assert_eq!(forge.call_count("list_package_versions"), 2);
    }

    #[tokio::test]
    async fn test_digest_scan_missing_reads_all_pages() {
        let forge = MemoryForge::new();
        forge.set_package_pages(vec![
            vec![package_version(1, "sha256:01", &[])],
            vec![package_version(2, "sha256:02", &[])],
        ]);
        let owner = PackageOwner::new(OwnerKind::Org, "acme");

        let err = find_package_version_by_digest(&forge, &owner, "fixture", "sha256:deadbeef")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("sha256:deadbeef"));
        assert_eq!(forge.call_count("list_package_versions"), 2);
    }
}
