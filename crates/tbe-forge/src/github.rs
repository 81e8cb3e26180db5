//! reqwest implementation of [`HostingApi`] for the GitHub REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::api::{HostingApi, PackageOwner, RepoRef};
use crate::auth::{app_jwt, AppCredentials, Credentials, InstallationToken};
use crate::error::ForgeError;
use crate::types::*;
use crate::Result;

/// Public GitHub API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const MEDIA_TYPE: &str = "application/vnd.github+json";
const PACKAGE_PAGE_SIZE: u32 = 100;

/// GitHub client configuration
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// API base URL (GitHub Enterprise or a test server)
    pub api_url: String,
    pub credentials: Credentials,
    pub user_agent: String,
}

impl GitHubConfig {
    pub fn new(credentials: Credentials) -> Self {
        GitHubConfig {
            api_url: DEFAULT_API_URL.to_string(),
            credentials,
            user_agent: format!("tbe/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Point the client at a different API root.
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }
}

/// GitHub REST client
pub struct GitHubClient {
    config: GitHubConfig,
    http: reqwest::Client,
    installation_token: Mutex<Option<InstallationToken>>,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Serialize)]
struct NewRef<'a> {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: &'a str,
}

impl GitHubClient {
    /// Create a new GitHub client
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(GitHubClient {
            config,
            http,
            installation_token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    async fn bearer_token(&self) -> Result<String> {
        match &self.config.credentials {
            Credentials::Token(token) => Ok(token.clone()),
            Credentials::App(app) => {
                let mut cached = self.installation_token.lock().await;
                let now = Utc::now();
                if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
                    return Ok(token.token.clone());
                }
                let token = self.fetch_installation_token(app, now).await?;
                let value = token.token.clone();
                *cached = Some(token);
                Ok(value)
            }
        }
    }

    async fn fetch_installation_token(
        &self,
        app: &AppCredentials,
        now: DateTime<Utc>,
    ) -> Result<InstallationToken> {
        let jwt = app_jwt(app, now)?;
        let path = format!("/app/installations/{}/access_tokens", app.installation_id);
        debug!(
            app_id = app.app_id,
            installation_id = app.installation_id,
            "Requesting installation token"
        );

        let response = self
            .http
            .post(self.url(&path))
            .bearer_auth(jwt)
            .header(header::ACCEPT, MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;
        let response = check_status(response, &Method::POST, &path)
            .await
            .map_err(|e| ForgeError::Auth(e.to_string()))?;
        decode(response, &path).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder + Send,
    ) -> Result<Response> {
        let token = self.bearer_token().await?;
        let request = self
            .http
            .request(method.clone(), self.url(path))
            .bearer_auth(token)
            .header(header::ACCEPT, MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION);

        trace!(method = %method, path = %path, "GitHub request");
        let response = build(request).send().await?;
        check_status(response, &method, path).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.execute(Method::GET, path, |r| r.query(query)).await?;
        decode(response, path).await
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.execute(method, path, |r| r.json(body)).await?;
        decode(response, path).await
    }
}

async fn check_status(response: Response, method: &Method, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiMessage>(&body) {
        Ok(api) => api.message,
        Err(_) => body.chars().take(200).collect(),
    };
    debug!(status = status.as_u16(), method = %method, path = %path, "GitHub request failed");

    Err(ForgeError::Status {
        status: status.as_u16(),
        method: method.to_string(),
        path: path.to_string(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ForgeError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Page number advertised by a `Link` header's `rel="next"` entry.
pub(crate) fn next_page_from_link(link: &str) -> Option<u32> {
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts
            .next()?
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>');
        if !parts.any(|p| p.trim() == r#"rel="next""#) {
            return None;
        }
        let url = reqwest::Url::parse(target).ok()?;
        let page = url
            .query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse::<u32>().ok());
        page
    })
}

fn repo_path(repo: &RepoRef, rest: &str) -> String {
    format!("/repos/{}/{}{}", repo.owner, repo.name, rest)
}

#[async_trait]
impl HostingApi for GitHubClient {
    async fn authenticated_user(&self) -> Result<User> {
        self.get_json("/user", &[]).await
    }

    async fn get_branch(&self, repo: &RepoRef, branch: &str) -> Result<Branch> {
        self.get_json(&repo_path(repo, &format!("/branches/{branch}")), &[])
            .await
    }

    async fn create_ref(&self, repo: &RepoRef, branch: &str, sha: &str) -> Result<GitRef> {
        let body = NewRef {
            git_ref: format!("refs/heads/{branch}"),
            sha,
        };
        self.send_json(Method::POST, &repo_path(repo, "/git/refs"), &body)
            .await
    }

    async fn delete_ref(&self, repo: &RepoRef, branch: &str) -> Result<()> {
        let path = repo_path(repo, &format!("/git/refs/heads/{branch}"));
        self.execute(Method::DELETE, &path, |r| r).await?;
        Ok(())
    }

    async fn get_content(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<ContentFile> {
        let query: Vec<(&str, String)> = git_ref
            .map(|r| vec![("ref", r.to_string())])
            .unwrap_or_default();
        self.get_json(&repo_path(repo, &format!("/contents/{path}")), &query)
            .await
    }

    async fn put_content(
        &self,
        repo: &RepoRef,
        path: &str,
        update: &ContentUpdate,
    ) -> Result<ContentWrite> {
        self.send_json(
            Method::PUT,
            &repo_path(repo, &format!("/contents/{path}")),
            update,
        )
        .await
    }

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pr: &NewPullRequest,
    ) -> Result<PullRequest> {
        self.send_json(Method::POST, &repo_path(repo, "/pulls"), pr)
            .await
    }

    async fn merge_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
        merge: &MergeRequest,
    ) -> Result<MergeResult> {
        self.send_json(
            Method::PUT,
            &repo_path(repo, &format!("/pulls/{number}/merge")),
            merge,
        )
        .await
    }

    async fn list_workflow_runs(
        &self,
        repo: &RepoRef,
        workflow: &str,
        filter: &RunFilter,
    ) -> Result<WorkflowRunList> {
        let mut query = Vec::new();
        if let Some(sha) = &filter.head_sha {
            query.push(("head_sha", sha.clone()));
        }
        if let Some(event) = &filter.event {
            query.push(("event", event.clone()));
        }
        self.get_json(
            &repo_path(repo, &format!("/actions/workflows/{workflow}/runs")),
            &query,
        )
        .await
    }

    async fn get_workflow_run(&self, repo: &RepoRef, run_id: u64) -> Result<WorkflowRun> {
        self.get_json(&repo_path(repo, &format!("/actions/runs/{run_id}")), &[])
            .await
    }

    async fn list_run_artifacts(&self, repo: &RepoRef, run_id: u64) -> Result<ArtifactList> {
        self.get_json(
            &repo_path(repo, &format!("/actions/runs/{run_id}/artifacts")),
            &[],
        )
        .await
    }

    async fn download_artifact(&self, repo: &RepoRef, artifact_id: u64) -> Result<Vec<u8>> {
        // The API answers with a redirect to blob storage; reqwest follows it
        // and drops the Authorization header when the host changes.
        let path = repo_path(repo, &format!("/actions/artifacts/{artifact_id}/zip"));
        let response = self.execute(Method::GET, &path, |r| r).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn list_package_versions(
        &self,
        owner: &PackageOwner,
        package: &str,
        page: u32,
    ) -> Result<Page<PackageVersion>> {
        let path = format!(
            "/{}/{}/packages/container/{}/versions",
            owner.kind.path_segment(),
            owner.name,
            package.replace('/', "%2F"),
        );
        let query = [
            ("per_page", PACKAGE_PAGE_SIZE.to_string()),
            ("page", page.to_string()),
        ];
        let response = self
            .execute(Method::GET, &path, |r| r.query(&query))
            .await?;
        let next_page = response
            .headers()
            .get(header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_page_from_link)
            .filter(|next| *next > page);
        let items = decode(response, &path).await?;
        Ok(Page { items, next_page })
    }
}
