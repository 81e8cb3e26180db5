//! In-memory fake of the hosting API (testing only)
//!
//! `MemoryForge` keeps branches, files and pull requests in a `HashMap` and
//! replays scripted workflow-run and package responses, so the poller and
//! the scenario can be exercised without network access.

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{HostingApi, PackageOwner, RepoRef};
use crate::error::ForgeError;
use crate::types::*;
use crate::Result;

/// Default branch name used by the fake.
pub const DEFAULT_BRANCH: &str = "main";

/// A pull request as recorded by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRecord {
    pub number: u64,
    pub title: String,
    pub head: String,
    pub base: String,
    pub merged: bool,
    pub merge: Option<MergeRequest>,
}

#[derive(Debug, Default)]
struct ForgeState {
    user: String,
    branches: HashMap<String, String>,
    files: HashMap<(String, String), (String, Vec<u8>)>,
    pulls: Vec<PullRecord>,
    merge_sha: String,
    run_listings: VecDeque<Vec<WorkflowRun>>,
    run_states: HashMap<u64, VecDeque<WorkflowRun>>,
    artifacts: HashMap<u64, Vec<Artifact>>,
    archives: HashMap<u64, Vec<u8>>,
    package_pages: Vec<Vec<PackageVersion>>,
    failures: HashMap<String, VecDeque<u16>>,
    calls: Vec<String>,
    seq: u64,
}

impl ForgeState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Record the call and pop a scripted failure for it, if any.
    fn enter(&mut self, op: &str) -> Result<()> {
        self.calls.push(op.to_string());
        match self.failures.get_mut(op).and_then(|q| q.pop_front()) {
            Some(status) => Err(status_error(status, op, "scripted failure")),
            None => Ok(()),
        }
    }
}

/// Scripted sequences advance one entry per call and then stick on the last.
fn advance<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

fn status_error(status: u16, op: &str, message: &str) -> ForgeError {
    ForgeError::Status {
        status,
        method: "FAKE".to_string(),
        path: op.to_string(),
        message: message.to_string(),
    }
}

/// In-memory `HostingApi`.
#[derive(Debug)]
pub struct MemoryForge {
    state: Mutex<ForgeState>,
}

impl Default for MemoryForge {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryForge {
    /// A repository with a `main` branch at `main-sha`, authenticated as `octocat`.
    pub fn new() -> Self {
        let mut state = ForgeState {
            user: "octocat".to_string(),
            merge_sha: "merge-sha".to_string(),
            ..Default::default()
        };
        state
            .branches
            .insert(DEFAULT_BRANCH.to_string(), "main-sha".to_string());
        MemoryForge {
            state: Mutex::new(state),
        }
    }

    pub fn set_user(&self, login: &str) {
        self.state.lock().unwrap().user = login.to_string();
    }

    pub fn set_branch(&self, name: &str, sha: &str) {
        self.state
            .lock()
            .unwrap()
            .branches
            .insert(name.to_string(), sha.to_string());
    }

    /// Put a file on the default branch.
    pub fn set_file(&self, path: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let blob = format!("blob-{}", state.next_seq());
        state.files.insert(
            (DEFAULT_BRANCH.to_string(), path.to_string()),
            (blob, content.to_vec()),
        );
    }

    /// SHA returned by the next merge.
    pub fn set_merge_sha(&self, sha: &str) {
        self.state.lock().unwrap().merge_sha = sha.to_string();
    }

    /// Append a response for `list_workflow_runs`.
    pub fn push_run_listing(&self, runs: Vec<WorkflowRun>) {
        self.state.lock().unwrap().run_listings.push_back(runs);
    }

    /// Append a response for `get_workflow_run` of `run.id`.
    pub fn push_run_state(&self, run: WorkflowRun) {
        self.state
            .lock()
            .unwrap()
            .run_states
            .entry(run.id)
            .or_default()
            .push_back(run);
    }

    /// Attach an artifact archive to a run; returns the artifact id.
    pub fn add_artifact(&self, run_id: u64, name: &str, archive: Vec<u8>) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = 1000 + state.next_seq();
        state.artifacts.entry(run_id).or_default().push(Artifact {
            id,
            name: name.to_string(),
            size_in_bytes: archive.len() as u64,
            expired: false,
        });
        state.archives.insert(id, archive);
        id
    }

    pub fn set_package_pages(&self, pages: Vec<Vec<PackageVersion>>) {
        self.state.lock().unwrap().package_pages = pages;
    }

    /// Make the next call to `op` fail with `status`.
    pub fn fail_next(&self, op: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(status);
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == op)
            .count()
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.state.lock().unwrap().branches.contains_key(name)
    }

    pub fn file_on_branch(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&(branch.to_string(), path.to_string()))
            .map(|(_, bytes)| bytes.clone())
    }

    pub fn pulls(&self) -> Vec<PullRecord> {
        self.state.lock().unwrap().pulls.clone()
    }
}

#[async_trait]
impl HostingApi for MemoryForge {
    async fn authenticated_user(&self) -> Result<User> {
        let mut state = self.state.lock().unwrap();
        state.enter("authenticated_user")?;
        Ok(User {
            login: state.user.clone(),
        })
    }

    async fn get_branch(&self, _repo: &RepoRef, branch: &str) -> Result<Branch> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_branch")?;
        let sha = state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| status_error(404, "get_branch", "Branch not found"))?;
        Ok(Branch {
            name: branch.to_string(),
            commit: CommitRef { sha },
        })
    }

    async fn create_ref(&self, _repo: &RepoRef, branch: &str, sha: &str) -> Result<GitRef> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_ref")?;
        if state.branches.contains_key(branch) {
            return Err(status_error(422, "create_ref", "Reference already exists"));
        }
        state.branches.insert(branch.to_string(), sha.to_string());
        Ok(GitRef {
            git_ref: format!("refs/heads/{branch}"),
            object: CommitRef {
                sha: sha.to_string(),
            },
        })
    }

    async fn delete_ref(&self, _repo: &RepoRef, branch: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("delete_ref")?;
        state
            .branches
            .remove(branch)
            .map(|_| ())
            .ok_or_else(|| status_error(422, "delete_ref", "Reference does not exist"))
    }

    async fn get_content(
        &self,
        _repo: &RepoRef,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<ContentFile> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_content")?;
        let branch = git_ref.unwrap_or(DEFAULT_BRANCH).to_string();
        let (blob, bytes) = state
            .files
            .get(&(branch, path.to_string()))
            .cloned()
            .ok_or_else(|| status_error(404, "get_content", "Not Found"))?;
        let encoded = ContentUpdate::new("", &bytes).content;
        Ok(ContentFile {
            sha: blob,
            path: path.to_string(),
            content: Some(encoded),
            encoding: Some("base64".to_string()),
        })
    }

    async fn put_content(
        &self,
        _repo: &RepoRef,
        path: &str,
        update: &ContentUpdate,
    ) -> Result<ContentWrite> {
        let mut state = self.state.lock().unwrap();
        state.enter("put_content")?;
        let branch = update
            .branch
            .clone()
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        if !state.branches.contains_key(&branch) {
            return Err(status_error(404, "put_content", "Branch not found"));
        }

        // Files not yet written on the branch are inherited from main.
        let existing = state
            .files
            .get(&(branch.clone(), path.to_string()))
            .or_else(|| state.files.get(&(DEFAULT_BRANCH.to_string(), path.to_string())))
            .map(|(blob, _)| blob.clone());
        if existing.is_some() && existing != update.sha {
            return Err(status_error(409, "put_content", "sha does not match"));
        }

        let bytes = ContentFile {
            sha: String::new(),
            path: path.to_string(),
            content: Some(update.content.clone()),
            encoding: Some("base64".to_string()),
        }
        .decoded()
        .ok_or_else(|| status_error(422, "put_content", "content is not valid Base64"))?;

        let seq = state.next_seq();
        let blob = format!("blob-{seq}");
        let commit = format!("commit-{seq}");
        state
            .files
            .insert((branch.clone(), path.to_string()), (blob.clone(), bytes));
        state.branches.insert(branch, commit.clone());

        Ok(ContentWrite {
            content: Some(ContentFile {
                sha: blob,
                path: path.to_string(),
                content: None,
                encoding: None,
            }),
            commit: CommitRef { sha: commit },
        })
    }

    async fn create_pull_request(
        &self,
        _repo: &RepoRef,
        pr: &NewPullRequest,
    ) -> Result<PullRequest> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_pull_request")?;
        if !state.branches.contains_key(&pr.head) {
            return Err(status_error(422, "create_pull_request", "head does not exist"));
        }
        let number = state.pulls.len() as u64 + 1;
        state.pulls.push(PullRecord {
            number,
            title: pr.title.clone(),
            head: pr.head.clone(),
            base: pr.base.clone(),
            merged: false,
            merge: None,
        });
        Ok(PullRequest {
            number,
            state: Some("open".to_string()),
            html_url: None,
        })
    }

    async fn merge_pull_request(
        &self,
        _repo: &RepoRef,
        number: u64,
        merge: &MergeRequest,
    ) -> Result<MergeResult> {
        let mut state = self.state.lock().unwrap();
        state.enter("merge_pull_request")?;
        let merge_sha = state.merge_sha.clone();
        let pull = state
            .pulls
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| status_error(404, "merge_pull_request", "Not Found"))?;
        if pull.merged {
            return Err(status_error(405, "merge_pull_request", "Pull Request is not mergeable"));
        }
        pull.merged = true;
        pull.merge = Some(merge.clone());
        let base = pull.base.clone();
        state.branches.insert(base, merge_sha.clone());
        Ok(MergeResult {
            sha: merge_sha,
            merged: true,
            message: "Pull Request successfully merged".to_string(),
        })
    }

    async fn list_workflow_runs(
        &self,
        _repo: &RepoRef,
        _workflow: &str,
        filter: &RunFilter,
    ) -> Result<WorkflowRunList> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_workflow_runs")?;
        let runs: Vec<WorkflowRun> = advance(&mut state.run_listings)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| filter.head_sha.as_ref().map_or(true, |sha| &r.head_sha == sha))
            .filter(|r| match (&filter.event, &r.event) {
                (Some(want), Some(got)) => want == got,
                _ => true,
            })
            .collect();
        Ok(WorkflowRunList {
            total_count: runs.len() as u64,
            workflow_runs: runs,
        })
    }

    async fn get_workflow_run(&self, _repo: &RepoRef, run_id: u64) -> Result<WorkflowRun> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_workflow_run")?;
        state
            .run_states
            .get_mut(&run_id)
            .and_then(advance)
            .ok_or_else(|| status_error(404, "get_workflow_run", "Not Found"))
    }

    async fn list_run_artifacts(&self, _repo: &RepoRef, run_id: u64) -> Result<ArtifactList> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_run_artifacts")?;
        let artifacts = state.artifacts.get(&run_id).cloned().unwrap_or_default();
        Ok(ArtifactList {
            total_count: artifacts.len() as u64,
            artifacts,
        })
    }

    async fn download_artifact(&self, _repo: &RepoRef, artifact_id: u64) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.enter("download_artifact")?;
        state
            .archives
            .get(&artifact_id)
            .cloned()
            .ok_or_else(|| status_error(404, "download_artifact", "Not Found"))
    }

    async fn list_package_versions(
        &self,
        _owner: &PackageOwner,
        _package: &str,
        page: u32,
    ) -> Result<Page<PackageVersion>> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_package_versions")?;
        let total = state.package_pages.len() as u32;
        let items = state
            .package_pages
            .get(page.saturating_sub(1) as usize)
            .cloned()
            .unwrap_or_default();
        Ok(Page {
            items,
            next_page: (page < total).then_some(page + 1),
        })
    }
}

// ---------------------------------------------------------------------------
// Fixture builders
// ---------------------------------------------------------------------------

/// A `push` workflow run fixture.
pub fn workflow_run(id: u64, head_sha: &str, status: &str, conclusion: Option<&str>) -> WorkflowRun {
    WorkflowRun {
        id,
        name: Some("build-and-push".to_string()),
        head_sha: head_sha.to_string(),
        status: RunStatus::from(status.to_string()),
        conclusion: conclusion.map(|c| RunConclusion::from(c.to_string())),
        event: Some("push".to_string()),
        html_url: None,
    }
}

/// A container package version fixture.
pub fn package_version(id: u64, digest: &str, tags: &[&str]) -> PackageVersion {
    PackageVersion {
        id,
        name: digest.to_string(),
        metadata: PackageMetadata {
            package_type: Some("container".to_string()),
            container: Some(ContainerMetadata {
                tags: tags.iter().map(|t| t.to_string()).collect(),
            }),
        },
    }
}

/// Zip archive with the given `(name, text)` entries.
pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, text) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(text.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// The archive the build-and-push workflow uploads for `digest`.
pub fn metadata_archive(digest: &str) -> Vec<u8> {
    let doc = serde_json::json!({ "digest": digest }).to_string();
    zip_archive(&[("workflow-metadata.json", doc.as_str())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoRef {
        RepoRef::new("octocat", "fixture")
    }

    #[tokio::test]
    async fn test_branch_lifecycle() {
        let forge = MemoryForge::new();
        let main = forge.get_branch(&repo(), "main").await.unwrap();
        forge
            .create_ref(&repo(), "feature", &main.commit.sha)
            .await
            .unwrap();
        assert!(forge.has_branch("feature"));

        let dup = forge.create_ref(&repo(), "feature", "x").await.unwrap_err();
        assert_eq!(dup.status(), Some(422));

        forge.delete_ref(&repo(), "feature").await.unwrap();
        assert!(!forge.has_branch("feature"));
    }

    #[tokio::test]
    async fn test_put_content_requires_matching_sha() {
        let forge = MemoryForge::new();
        forge.set_file("test", b"old");
        forge.set_branch("feature", "main-sha");
        let file = forge.get_content(&repo(), "test", None).await.unwrap();

        let stale = ContentUpdate::new("m", b"new")
            .replacing("wrong")
            .on_branch("feature");
        let err = forge.put_content(&repo(), "test", &stale).await.unwrap_err();
        assert_eq!(err.status(), Some(409));

        let ok = ContentUpdate::new("m", b"new")
            .replacing(&file.sha)
            .on_branch("feature");
        forge.put_content(&repo(), "test", &ok).await.unwrap();
        assert_eq!(forge.file_on_branch("feature", "test").unwrap(), b"new");
        assert_eq!(forge.file_on_branch("main", "test").unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_merge_moves_base_branch() {
        let forge = MemoryForge::new();
        forge.set_branch("feature", "f1");
        forge.set_merge_sha("sha1");
        let pr = forge
            .create_pull_request(
                &repo(),
                &NewPullRequest {
                    title: "test".to_string(),
                    head: "feature".to_string(),
                    base: "main".to_string(),
                    body: None,
                },
            )
            .await
            .unwrap();
        let merge = MergeRequest {
            merge_method: MergeMethod::Squash,
            commit_title: None,
        };
        let result = forge
            .merge_pull_request(&repo(), pr.number, &merge)
            .await
            .unwrap();
        assert_eq!(result.sha, "sha1");
        assert_eq!(forge.get_branch(&repo(), "main").await.unwrap().commit.sha, "sha1");

        let again = forge
            .merge_pull_request(&repo(), pr.number, &merge)
            .await
            .unwrap_err();
        assert_eq!(again.status(), Some(405));
    }

    #[tokio::test]
    async fn test_scripted_run_states_stick_on_last() {
        let forge = MemoryForge::new();
        forge.push_run_state(workflow_run(42, "sha1", "queued", None));
        forge.push_run_state(workflow_run(42, "sha1", "completed", Some("success")));

        let first = forge.get_workflow_run(&repo(), 42).await.unwrap();
        let second = forge.get_workflow_run(&repo(), 42).await.unwrap();
        let third = forge.get_workflow_run(&repo(), 42).await.unwrap();
        assert_eq!(first.status, RunStatus::Queued);
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(third.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_run_listing_filters_by_commit() {
        let forge = MemoryForge::new();
        forge.push_run_listing(vec![
            workflow_run(1, "other", "queued", None),
            workflow_run(2, "sha1", "queued", None),
        ]);
        let list = forge
            .list_workflow_runs(&repo(), "build-and-push.yaml", &RunFilter::for_commit("sha1", "push"))
            .await
            .unwrap();
        assert_eq!(list.workflow_runs.len(), 1);
        assert_eq!(list.workflow_runs[0].id, 2);
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let forge = MemoryForge::new();
        forge.fail_next("authenticated_user", 502);
        let err = forge.authenticated_user().await.unwrap_err();
        assert_eq!(err.status(), Some(502));
        assert_eq!(forge.authenticated_user().await.unwrap().login, "octocat");
        assert_eq!(forge.call_count("authenticated_user"), 2);
    }
}
