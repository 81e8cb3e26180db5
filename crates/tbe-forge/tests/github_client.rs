//! `GitHubClient` against a local axum stub of the GitHub REST API.

use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::TryStreamExt;
use serde_json::{json, Value};
use tbe_forge::fakes::metadata_archive;
use tbe_forge::{
    package_version_pages, read_metadata_archive, Credentials, GitHubClient, GitHubConfig,
    HostingApi, MergeMethod, MergeRequest, OwnerKind, PackageOwner, RepoRef, RunFilter, RunStatus,
};

const TOKEN: &str = "test-token";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer test-token")
}

async fn user(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Bad credentials" })),
        )
            .into_response();
    }
    assert_eq!(
        headers.get("x-github-api-version").unwrap(),
        "2022-11-28"
    );
    Json(json!({ "login": "octocat" })).into_response()
}

async fn workflow_runs(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let sha = params.get("head_sha").cloned().unwrap_or_default();
    let event = params.get("event").cloned().unwrap_or_default();
    Json(json!({
        "total_count": 1,
        "workflow_runs": [{
            "id": 42,
            "head_sha": sha,
            "status": "queued",
            "conclusion": null,
            "event": event,
        }]
    }))
}

async fn workflow_run(Path((_, _, id)): Path<(String, String, u64)>) -> Json<Value> {
    Json(json!({
        "id": id,
        "head_sha": "sha1",
        "status": "completed",
        "conclusion": "success",
    }))
}

async fn create_ref(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::CREATED,
        Json(json!({ "ref": body["ref"], "object": { "sha": body["sha"] } })),
    )
}

async fn merge(Path((_, _, number)): Path<(String, String, u64)>) -> Response {
    if number == 1 {
        return Json(json!({ "sha": "sha1", "merged": true, "message": "merged" }))
            .into_response();
    }
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "message": "Pull Request is not mergeable" })),
    )
        .into_response()
}

async fn artifact_zip(Path((_, _, id)): Path<(String, String, u64)>) -> Redirect {
    Redirect::temporary(&format!("/blob/{id}"))
}

async fn blob(Path(_id): Path<u64>) -> Vec<u8> {
    metadata_archive("sha256:deadbeef")
}

async fn package_versions(Query(params): Query<HashMap<String, String>>) -> Response {
    let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let body = Json(json!([{
        "id": page,
        "name": format!("sha256:{page:02}"),
        "metadata": { "container": { "tags": [format!("t{page}")] } }
    }]));
    if page < 3 {
        let link = format!(
            "<https://api.github.com/users/octocat/packages/container/fixture/versions?per_page=100&page={}>; rel=\"next\"",
            page + 1
        );
        ([(header::LINK, link)], body).into_response()
    } else {
        body.into_response()
    }
}

async fn spawn_stub() -> String {
    let app = Router::new()
        .route("/user", get(user))
        .route(
            "/repos/{owner}/{repo}/actions/workflows/{workflow}/runs",
            get(workflow_runs),
        )
        .route("/repos/{owner}/{repo}/actions/runs/{id}", get(workflow_run))
        .route("/repos/{owner}/{repo}/git/refs", post(create_ref))
        .route("/repos/{owner}/{repo}/pulls/{number}/merge", put(merge))
        .route(
            "/repos/{owner}/{repo}/actions/artifacts/{id}/zip",
            get(artifact_zip),
        )
        .route("/blob/{id}", get(blob))
        .route(
            "/users/{owner}/packages/container/{package}/versions",
            get(package_versions),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base: &str, token: &str) -> GitHubClient {
    let config = GitHubConfig::new(Credentials::Token(token.to_string())).with_api_url(base);
    GitHubClient::new(config).expect("client")
}

fn repo() -> RepoRef {
    RepoRef::new("octocat", "fixture")
}

#[tokio::test]
async fn test_authenticated_user_sends_bearer_token() {
    let base = spawn_stub().await;
    let user = client(&base, TOKEN).authenticated_user().await.unwrap();
    assert_eq!(user.login, "octocat");
}

#[tokio::test]
async fn test_bad_credentials_surface_status_and_message() {
    let base = spawn_stub().await;
    let err = client(&base, "wrong").authenticated_user().await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(err.to_string().contains("Bad credentials"));
}

#[tokio::test]
async fn test_list_workflow_runs_passes_filter() {
    let base = spawn_stub().await;
    let list = client(&base, TOKEN)
        .list_workflow_runs(
            &repo(),
            "build-and-push.yaml",
            &RunFilter::for_commit("sha1", "push"),
        )
        .await
        .unwrap();
    assert_eq!(list.workflow_runs.len(), 1);
    assert_eq!(list.workflow_runs[0].head_sha, "sha1");
    assert_eq!(list.workflow_runs[0].event.as_deref(), Some("push"));
}

#[tokio::test]
async fn test_get_workflow_run_decodes_terminal_state() {
    let base = spawn_stub().await;
    let run = client(&base, TOKEN)
        .get_workflow_run(&repo(), 42)
        .await
        .unwrap();
    assert_eq!(run.id, 42);
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.succeeded());
}

#[tokio::test]
async fn test_create_ref_posts_full_ref_name() {
    let base = spawn_stub().await;
    let created = client(&base, TOKEN)
        .create_ref(&repo(), "18b2f", "abc")
        .await
        .unwrap();
    assert_eq!(created.git_ref, "refs/heads/18b2f");
    assert_eq!(created.object.sha, "abc");
}

#[tokio::test]
async fn test_merge_error_is_propagated_unchanged() {
    let base = spawn_stub().await;
    let gh = client(&base, TOKEN);
    let merge = MergeRequest {
        merge_method: MergeMethod::Squash,
        commit_title: Some("test: 18b2f".to_string()),
    };

    let ok = gh.merge_pull_request(&repo(), 1, &merge).await.unwrap();
    assert_eq!(ok.sha, "sha1");

    let err = gh.merge_pull_request(&repo(), 2, &merge).await.unwrap_err();
    assert_eq!(err.status(), Some(405));
    assert!(err.to_string().contains("not mergeable"));
}

#[tokio::test]
async fn test_download_artifact_follows_redirect() {
    let base = spawn_stub().await;
    let bytes = client(&base, TOKEN)
        .download_artifact(&repo(), 7)
        .await
        .unwrap();
    let meta = read_metadata_archive(&bytes, "workflow-metadata.json").unwrap();
    assert_eq!(meta.digest, "sha256:deadbeef");
}

#[tokio::test]
async fn test_package_pages_follow_link_header() {
    let base = spawn_stub().await;
    let gh = client(&base, TOKEN);
    let owner = PackageOwner::new(OwnerKind::User, "octocat");

    let pages: Vec<_> = package_version_pages(&gh, &owner, "fixture")
        .try_collect()
        .await
        .unwrap();

    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0][0].name, "sha256:01");
    assert_eq!(pages[2][0].tags(), ["t3".to_string()]);
}

#[tokio::test]
async fn test_connection_refused_is_http_error() {
    let gh = client("http://127.0.0.1:9", TOKEN);
    let err = gh.authenticated_user().await.unwrap_err();
    assert!(err.status().is_none());
    assert!(matches!(err, tbe_forge::ForgeError::Http(_)));
}
