//! Build-and-push scenario orchestration.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tbe_core::{
    emit_scenario_finished, emit_stage_finished, emit_stage_started, fetch_run_metadata,
    find_package_version_by_digest, find_run_for_commit, scenario_span, wait_for_run_completion,
    Delay, E2eConfig,
};
use tbe_cosign::{image_reference, AttestationVerifier, CosignQueue, TrustConfig};
use tbe_forge::{ContentUpdate, HostingApi, MergeRequest, NewPullRequest, RepoRef};
use tracing::{info, warn, Instrument};

use crate::checks::{
    check_attestations, check_conclusion, check_tags, CheckKind, CheckOutcome, ScenarioVerdict,
};
use crate::report::ScenarioReport;
use crate::stage::{Stage, StageRecord};

/// Hex millisecond timestamp, used for the scratch branch and fixture content.
pub fn hex_timestamp() -> String {
    format!("{:x}", chrono::Utc::now().timestamp_millis())
}

/// One end-to-end run: push a change through a pull request, wait for the
/// build pipeline, then check what it published.
pub struct BuildAndPushScenario {
    api: Arc<dyn HostingApi>,
    config: E2eConfig,
    queue: CosignQueue,
    verifier: AttestationVerifier,
    delay: Delay,
    branch: Option<String>,
}

impl BuildAndPushScenario {
    pub fn new(api: Arc<dyn HostingApi>, config: E2eConfig, queue: CosignQueue) -> Self {
        let verifier = AttestationVerifier::new(queue.clone(), config.verify_options());
        Self {
            api,
            config,
            queue,
            verifier,
            delay: Delay::new(),
            branch: None,
        }
    }

    /// Use a fixed scratch branch name instead of a timestamp.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Share a delay so that cancelling it interrupts the polls.
    pub fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    pub fn config(&self) -> &E2eConfig {
        &self.config
    }

    /// Drive the scenario and evaluate its checks.
    ///
    /// Returns `Err` when a setup stage fails; check failures are reported in
    /// the returned report's verdict instead.
    pub async fn run(&self) -> anyhow::Result<ScenarioReport> {
        let branch = self.branch.clone().unwrap_or_else(hex_timestamp);
        let span = scenario_span(&branch);
        self.run_with_trust(&branch).instrument(span).await
    }

    async fn run_with_trust(&self, branch: &str) -> anyhow::Result<ScenarioReport> {
        if !self.config.trust_enabled() {
            return self.drive(branch).await;
        }

        let home = self.config.home()?;
        let settings = self.config.trust_settings()?;
        let guard = TrustConfig::bootstrap(&self.queue, home, &settings)
            .await
            .context("failed to bootstrap cosign trust root")?;

        let result = self.drive(branch).await;

        match guard.restore().await {
            Ok(()) => result,
            Err(e) if result.is_ok() => {
                Err(anyhow::Error::new(e).context("failed to restore cosign trust root"))
            }
            Err(e) => {
                warn!(error = %e, "Failed to restore cosign trust root");
                result
            }
        }
    }

    async fn drive(&self, branch: &str) -> anyhow::Result<ScenarioReport> {
        let start = Instant::now();
        let api = self.api.as_ref();
        let config = &self.config;
        let mut stages = Vec::new();

        info!(branch, repository = %config.github.repository, "Starting build-and-push scenario");

        let owner = run_stage(&mut stages, Stage::ResolveOwner, self.resolve_owner()).await?;
        let repo = config.repo(&owner);

        let base_sha = run_stage(
            &mut stages,
            Stage::GetBaseBranch,
            self.base_branch_sha(&repo),
        )
        .await?;
        run_stage(
            &mut stages,
            Stage::CreateBranch,
            self.create_branch(&repo, branch, &base_sha),
        )
        .await?;

        let merge_sha = match self.push_change(&mut stages, &repo, branch).await {
            Ok(sha) => sha,
            Err(e) => {
                self.cleanup_branch(&repo, branch).await;
                return Err(e);
            }
        };

        run_stage(
            &mut stages,
            Stage::DeleteBranch,
            self.delete_branch(&repo, branch),
        )
        .await?;

        let run = run_stage(
            &mut stages,
            Stage::DiscoverRun,
            find_run_for_commit(
                api,
                &repo,
                &config.workflow,
                &merge_sha,
                &config.polling.discovery_policy(),
                &self.delay,
            ),
        )
        .await?;

        let run = run_stage(
            &mut stages,
            Stage::AwaitCompletion,
            wait_for_run_completion(
                api,
                &repo,
                run.id,
                &config.polling.completion_policy(),
                &self.delay,
            ),
        )
        .await?;

        let mut checks = vec![check_conclusion(&run)];
        let mut digest = None;
        let mut image = None;
        let mut tags = Vec::new();

        if run.succeeded() {
            let metadata = run_stage(
                &mut stages,
                Stage::FetchMetadata,
                fetch_run_metadata(api, &repo, run.id, &config.workflow),
            )
            .await?;

            let version = run_stage(
                &mut stages,
                Stage::FindPackage,
                find_package_version_by_digest(
                    api,
                    &config.package_owner(&owner),
                    config.package_name(),
                    &metadata.digest,
                ),
            )
            .await?;

            // Registry references are lowercase even when the login is not.
            let reference = image_reference(
                &config.scenario.registry,
                &owner.to_lowercase(),
                &config.package_name().to_lowercase(),
                &metadata.digest,
            );

            checks.push(check_tags(&config.tags, &version, &merge_sha));
            checks.extend(
                check_attestations(&self.verifier, &reference, &config.cosign.attestation_types)
                    .await,
            );

            tags = version.tags().to_vec();
            digest = Some(metadata.digest);
            image = Some(reference);
        } else {
            warn!(run_id = run.id, "Workflow run did not succeed, skipping image checks");
            let reason = "workflow run did not succeed";
            checks.push(CheckOutcome::skipped(CheckKind::ImageTags, reason));
            for attestation_type in &config.cosign.attestation_types {
                checks.push(CheckOutcome::skipped(
                    CheckKind::Attestation {
                        attestation_type: attestation_type.clone(),
                    },
                    reason,
                ));
            }
        }

        let verdict = ScenarioVerdict::evaluate(&checks);
        let duration_ms = start.elapsed().as_millis() as u64;
        emit_scenario_finished(branch, duration_ms, verdict.passed);

        Ok(ScenarioReport {
            branch: branch.to_string(),
            owner,
            repository: config.github.repository.clone(),
            merge_sha,
            run_id: run.id,
            run_url: run.html_url.clone(),
            conclusion: run.conclusion.as_ref().map(|c| c.as_str().to_string()),
            digest,
            image,
            tags,
            stages,
            checks,
            verdict,
            duration_ms,
        })
    }

    /// Fixture commit, pull request and merge. Returns the merge commit SHA.
    async fn push_change(
        &self,
        stages: &mut Vec<StageRecord>,
        repo: &RepoRef,
        branch: &str,
    ) -> anyhow::Result<String> {
        run_stage(stages, Stage::UpdateFixture, self.update_fixture(repo, branch)).await?;
        let number = run_stage(
            stages,
            Stage::OpenPullRequest,
            self.open_pull_request(repo, branch),
        )
        .await?;
        run_stage(
            stages,
            Stage::MergePullRequest,
            self.merge_pull_request(repo, number, branch),
        )
        .await
    }

    async fn resolve_owner(&self) -> tbe_core::Result<String> {
        match &self.config.github.owner {
            Some(owner) => Ok(owner.clone()),
            None => Ok(self.api.authenticated_user().await?.login),
        }
    }

    async fn base_branch_sha(&self, repo: &RepoRef) -> tbe_core::Result<String> {
        let base = self
            .api
            .get_branch(repo, &self.config.scenario.base_branch)
            .await?;
        Ok(base.commit.sha)
    }

    async fn create_branch(&self, repo: &RepoRef, branch: &str, sha: &str) -> tbe_core::Result<()> {
        self.api.create_ref(repo, branch, sha).await?;
        info!(branch, sha, "Created scratch branch");
        Ok(())
    }

    /// Rewrite the fixture file on the scratch branch, creating it when the
    /// base branch does not have one.
    async fn update_fixture(&self, repo: &RepoRef, branch: &str) -> tbe_core::Result<String> {
        let scenario = &self.config.scenario;
        let path = scenario.fixture_path.as_str();

        let existing = match self
            .api
            .get_content(repo, path, Some(&scenario.base_branch))
            .await
        {
            Ok(file) => Some(file.sha),
            Err(e) if e.is_not_found() => {
                info!(path, "Fixture file not found, creating it");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let content = hex_timestamp();
        let mut update =
            ContentUpdate::new(&scenario.pull_request_title, content.as_bytes()).on_branch(branch);
        if let Some(sha) = &existing {
            update = update.replacing(sha);
        }

        let write = self.api.put_content(repo, path, &update).await?;
        info!(path, commit = %write.commit.sha, "Committed fixture change");
        Ok(write.commit.sha)
    }

    async fn open_pull_request(&self, repo: &RepoRef, branch: &str) -> tbe_core::Result<u64> {
        let scenario = &self.config.scenario;
        let pr = NewPullRequest {
            title: scenario.pull_request_title.clone(),
            head: branch.to_string(),
            base: scenario.base_branch.clone(),
            body: None,
        };
        let pull = self.api.create_pull_request(repo, &pr).await?;
        info!(number = pull.number, "Opened pull request");
        Ok(pull.number)
    }

    async fn merge_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
        branch: &str,
    ) -> tbe_core::Result<String> {
        let scenario = &self.config.scenario;
        let merge = MergeRequest {
            merge_method: scenario.merge_method,
            commit_title: Some(format!("{}: {branch}", scenario.pull_request_title)),
        };
        let result = self.api.merge_pull_request(repo, number, &merge).await?;
        info!(number, sha = %result.sha, "Merged pull request");
        Ok(result.sha)
    }

    async fn delete_branch(&self, repo: &RepoRef, branch: &str) -> tbe_core::Result<()> {
        self.api.delete_ref(repo, branch).await?;
        info!(branch, "Deleted scratch branch");
        Ok(())
    }

    /// Best-effort removal of the scratch branch after a failed setup stage.
    async fn cleanup_branch(&self, repo: &RepoRef, branch: &str) {
        if let Err(e) = self.api.delete_ref(repo, branch).await {
            warn!(branch, error = %e, "Failed to clean up scratch branch");
        }
    }
}

/// Time one stage, record it and emit its lifecycle events.
async fn run_stage<T, F>(records: &mut Vec<StageRecord>, stage: Stage, work: F) -> anyhow::Result<T>
where
    F: Future<Output = tbe_core::Result<T>>,
{
    emit_stage_started(stage.name());
    let started = Instant::now();
    let result = work.await;
    let duration_ms = started.elapsed().as_millis() as u64;

    emit_stage_finished(stage.name(), duration_ms, result.is_ok());
    records.push(StageRecord {
        stage,
        duration_ms,
        success: result.is_ok(),
        error: result.as_ref().err().map(|e| e.to_string()),
    });

    result.with_context(|| format!("stage {stage} failed"))
}
