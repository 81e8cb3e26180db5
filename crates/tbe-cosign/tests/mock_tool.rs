//! Queue, verifier and trust bootstrap against shell scripts standing in
//! for the cosign binary.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tbe_cosign::{
    AttestationVerifier, CosignError, CosignQueue, CosignTool, TrustConfig, TrustSettings,
    VerifyOptions,
};
use tempfile::TempDir;

fn write_tool(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("cosign");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod tool");
    path
}

fn queue_with(body: &str) -> (TempDir, CosignQueue) {
    let home = tempfile::tempdir().expect("tempdir");
    let program = write_tool(home.path(), body);
    let queue = CosignQueue::spawn(CosignTool::new(program).with_home(home.path()));
    (home, queue)
}

fn settings(home: &Path) -> TrustSettings {
    TrustSettings {
        mirror: "https://tuf.example.test".to_string(),
        root: home.join("root.json"),
    }
}

const INIT_WRITES_MIRROR_ROOT: &str = r#"
if [ "$1" = "initialize" ]; then
  mkdir -p "$HOME/.sigstore"
  echo "$3" > "$HOME/.sigstore/root.json"
fi
exit 0"#;

#[tokio::test]
async fn test_verification_success() {
    let (_home, queue) = queue_with(r#"echo "verified $3"; exit 0"#);
    let verifier = AttestationVerifier::new(queue, VerifyOptions::default());

    let outcome = verifier
        .verify("ghcr.io/octocat/fixture@sha256:deadbeef", "spdxjson")
        .await
        .expect("verify");

    assert_eq!(outcome.status, 0);
    assert!(outcome.verified());
    assert_eq!(outcome.stdout.trim(), "verified spdxjson");
}

#[tokio::test]
async fn test_verification_failure_surfaces_stderr() {
    let (_home, queue) = queue_with(r#"echo "bad signature" >&2; exit 1"#);
    let verifier = AttestationVerifier::new(queue, VerifyOptions::default());

    let outcome = verifier
        .verify("ghcr.io/octocat/fixture@sha256:deadbeef", "slsaprovenance")
        .await
        .expect("a non-zero exit is still an outcome");

    assert_eq!(outcome.status, 1);
    assert!(!outcome.verified());
    assert!(outcome.stderr.contains("bad signature"));
}

#[tokio::test]
async fn test_signal_termination_reports_minus_one() {
    let (_home, queue) = queue_with("kill -9 $$");
    let output = queue.run(vec!["version".to_string()]).await.expect("run");
    assert_eq!(output.status, -1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invocations_never_overlap() {
    // A second invocation starting while the lock directory exists means two
    // processes ran at once.
    let (home, queue) = queue_with(
        r#"
if ! mkdir "$HOME/lock" 2>/dev/null; then echo overlap >> "$HOME/log"; fi
sleep 0.05
rmdir "$HOME/lock"
echo done >> "$HOME/log""#,
    );
    let verifier = AttestationVerifier::new(queue, VerifyOptions::default());

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let verifier = verifier.clone();
            tokio::spawn(async move { verifier.verify("img", &format!("type-{i}")).await })
        })
        .collect();
    for handle in handles {
        let outcome = handle.await.expect("join").expect("verify");
        assert!(outcome.verified());
    }

    let log = std::fs::read_to_string(home.path().join("log")).expect("log");
    assert_eq!(log.lines().filter(|l| *l == "done").count(), 5);
    assert!(!log.contains("overlap"), "invocations overlapped: {log}");
}

#[tokio::test]
async fn test_bootstrap_round_trip_restores_existing_directory() {
    let (home, queue) = queue_with(INIT_WRITES_MIRROR_ROOT);
    let sigstore = TrustConfig::sigstore_dir(home.path());
    std::fs::create_dir(&sigstore).unwrap();
    std::fs::write(sigstore.join("root.json"), "original").unwrap();
    std::fs::create_dir(sigstore.join("tuf")).unwrap();
    std::fs::write(sigstore.join("tuf").join("targets.json"), "targets").unwrap();

    let guard = TrustConfig::bootstrap(&queue, home.path(), &settings(home.path()))
        .await
        .expect("bootstrap");
    assert_eq!(
        std::fs::read_to_string(sigstore.join("root.json")).unwrap().trim(),
        "https://tuf.example.test"
    );
    assert!(TrustConfig::backup_dir(home.path()).exists());

    guard.restore().await.expect("restore");

    assert_eq!(std::fs::read_to_string(sigstore.join("root.json")).unwrap(), "original");
    assert_eq!(
        std::fs::read_to_string(sigstore.join("tuf").join("targets.json")).unwrap(),
        "targets"
    );
    assert!(!TrustConfig::backup_dir(home.path()).exists());
}

#[tokio::test]
async fn test_bootstrap_without_existing_directory_leaves_nothing() {
    let (home, queue) = queue_with(INIT_WRITES_MIRROR_ROOT);

    let guard = TrustConfig::bootstrap(&queue, home.path(), &settings(home.path()))
        .await
        .expect("bootstrap");
    assert!(TrustConfig::sigstore_dir(home.path()).exists());
    guard.restore().await.expect("restore");

    assert!(!TrustConfig::sigstore_dir(home.path()).exists());
    assert!(!TrustConfig::backup_dir(home.path()).exists());
}

#[tokio::test]
async fn test_dropped_guard_restores() {
    let (home, queue) = queue_with(INIT_WRITES_MIRROR_ROOT);
    let sigstore = TrustConfig::sigstore_dir(home.path());
    std::fs::create_dir(&sigstore).unwrap();
    std::fs::write(sigstore.join("root.json"), "original").unwrap();

    {
        let _guard = TrustConfig::bootstrap(&queue, home.path(), &settings(home.path()))
            .await
            .expect("bootstrap");
    }

    assert_eq!(std::fs::read_to_string(sigstore.join("root.json")).unwrap(), "original");
    assert!(!TrustConfig::backup_dir(home.path()).exists());
}

#[tokio::test]
async fn test_failed_initialize_restores_and_errors() {
    let (home, queue) = queue_with(r#"echo "mirror unreachable" >&2; exit 2"#);
    let sigstore = TrustConfig::sigstore_dir(home.path());
    std::fs::create_dir(&sigstore).unwrap();
    std::fs::write(sigstore.join("root.json"), "original").unwrap();

    let err = TrustConfig::bootstrap(&queue, home.path(), &settings(home.path()))
        .await
        .unwrap_err();

    match err {
        CosignError::CommandFailed { status, stderr, .. } => {
            assert_eq!(status, 2);
            assert!(stderr.contains("mirror unreachable"));
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert_eq!(std::fs::read_to_string(sigstore.join("root.json")).unwrap(), "original");
    assert!(!TrustConfig::backup_dir(home.path()).exists());
}

#[tokio::test]
async fn test_stale_backup_refuses_bootstrap() {
    let (home, queue) = queue_with(INIT_WRITES_MIRROR_ROOT);
    let backup = TrustConfig::backup_dir(home.path());
    std::fs::create_dir(&backup).unwrap();
    std::fs::write(backup.join("root.json"), "precious").unwrap();

    let err = TrustConfig::bootstrap(&queue, home.path(), &settings(home.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, CosignError::StaleBackup(_)));
    assert_eq!(std::fs::read_to_string(backup.join("root.json")).unwrap(), "precious");
}

#[tokio::test]
async fn test_repeated_reset_after_keep_preserves_original() {
    let (home, queue) = queue_with(INIT_WRITES_MIRROR_ROOT);
    let sigstore = TrustConfig::sigstore_dir(home.path());
    std::fs::create_dir(&sigstore).unwrap();
    std::fs::write(sigstore.join("root.json"), "original").unwrap();

    TrustConfig::bootstrap(&queue, home.path(), &settings(home.path()))
        .await
        .expect("bootstrap")
        .keep();
    assert!(TrustConfig::marker_file(home.path()).exists());

    tbe_cosign::trust::reset(home.path()).await.expect("first reset");
    tbe_cosign::trust::reset(home.path()).await.expect("second reset");

    assert_eq!(std::fs::read_to_string(sigstore.join("root.json")).unwrap(), "original");
    assert!(!TrustConfig::backup_dir(home.path()).exists());
    assert!(!TrustConfig::marker_file(home.path()).exists());
}

#[tokio::test]
async fn test_reset_after_restore_is_a_no_op() {
    let (home, queue) = queue_with(INIT_WRITES_MIRROR_ROOT);
    let sigstore = TrustConfig::sigstore_dir(home.path());
    std::fs::create_dir(&sigstore).unwrap();
    std::fs::write(sigstore.join("root.json"), "original").unwrap();

    let guard = TrustConfig::bootstrap(&queue, home.path(), &settings(home.path()))
        .await
        .expect("bootstrap");
    guard.restore().await.expect("restore");
    tbe_cosign::trust::reset(home.path()).await.expect("reset");

    assert_eq!(std::fs::read_to_string(sigstore.join("root.json")).unwrap(), "original");
}

#[tokio::test]
async fn test_reset_leaves_existing_directory_without_backup() {
    let (home, _queue) = queue_with(INIT_WRITES_MIRROR_ROOT);
    let sigstore = TrustConfig::sigstore_dir(home.path());
    std::fs::create_dir(&sigstore).unwrap();
    std::fs::write(sigstore.join("root.json"), "user trust root").unwrap();

    tbe_cosign::trust::reset(home.path()).await.expect("reset");

    assert_eq!(
        std::fs::read_to_string(sigstore.join("root.json")).unwrap(),
        "user trust root"
    );
}

#[tokio::test]
async fn test_failed_backup_rename_keeps_original() {
    let (home, queue) = queue_with(INIT_WRITES_MIRROR_ROOT);
    let sigstore = TrustConfig::sigstore_dir(home.path());
    std::fs::create_dir(&sigstore).unwrap();
    std::fs::write(sigstore.join("root.json"), "original").unwrap();
    // A dangling symlink passes the leftover check but a directory cannot
    // be renamed over it.
    std::os::unix::fs::symlink(
        home.path().join("missing-target"),
        TrustConfig::backup_dir(home.path()),
    )
    .unwrap();

    let err = TrustConfig::bootstrap(&queue, home.path(), &settings(home.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, CosignError::Io(_)), "got {err:?}");
    assert_eq!(std::fs::read_to_string(sigstore.join("root.json")).unwrap(), "original");
    assert!(!TrustConfig::marker_file(home.path()).exists());
}
