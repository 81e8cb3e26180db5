//! Scoped replacement of the tool's trust root.
//!
//! cosign caches TUF metadata in `$HOME/.sigstore`. To verify against a
//! private Sigstore deployment the harness moves any existing directory
//! aside, initializes from the deployment's mirror, and puts the original
//! back afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CosignError;
use crate::queue::CosignQueue;
use crate::Result;

const SIGSTORE_DIR: &str = ".sigstore";
const BACKUP_DIR: &str = ".sigstore-backup";
const MARKER_FILE: &str = ".sigstore-tbe-bootstrapped";

/// Where the custom trust root comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustSettings {
    /// TUF mirror URL
    pub mirror: String,
    /// Path to the initial `root.json`
    pub root: PathBuf,
}

/// Guard over a bootstrapped trust root.
///
/// Call [`TrustConfig::restore`] when done. If the guard is dropped without
/// that (error return, panic), the original directory is restored
/// synchronously on a best-effort basis.
///
/// A marker file next to the backup records that `.sigstore` belongs to the
/// harness. Without it, reset never deletes `.sigstore`.
#[derive(Debug)]
pub struct TrustConfig {
    home: PathBuf,
    armed: bool,
}

impl TrustConfig {
    pub fn sigstore_dir(home: &Path) -> PathBuf {
        home.join(SIGSTORE_DIR)
    }

    pub fn backup_dir(home: &Path) -> PathBuf {
        home.join(BACKUP_DIR)
    }

    pub fn marker_file(home: &Path) -> PathBuf {
        home.join(MARKER_FILE)
    }

    /// Back up `<home>/.sigstore` and initialize from `settings`.
    ///
    /// Refuses to run when a backup or marker from an earlier bootstrap is
    /// still present, since overwriting it would lose the user's original
    /// trust root.
    pub async fn bootstrap(
        queue: &CosignQueue,
        home: &Path,
        settings: &TrustSettings,
    ) -> Result<TrustConfig> {
        let sigstore = Self::sigstore_dir(home);
        let backup = Self::backup_dir(home);
        let marker = Self::marker_file(home);

        for leftover in [&backup, &marker] {
            if tokio::fs::try_exists(leftover).await? {
                return Err(CosignError::StaleBackup(leftover.clone()));
            }
        }

        if tokio::fs::try_exists(&sigstore).await? {
            tokio::fs::rename(&sigstore, &backup).await?;
            info!(backup = %backup.display(), "Backed up existing trust root");
        }

        // Only armed once the original is safely aside.
        let guard = TrustConfig {
            home: home.to_path_buf(),
            armed: true,
        };
        tokio::fs::write(&marker, b"").await?;

        let output = queue
            .run(vec![
                "initialize".to_string(),
                "--mirror".to_string(),
                settings.mirror.clone(),
                "--root".to_string(),
                settings.root.display().to_string(),
            ])
            .await?;
        if !output.success() {
            return Err(CosignError::CommandFailed {
                command: "initialize".to_string(),
                status: output.status,
                stderr: output.stderr,
            });
        }

        info!(mirror = %settings.mirror, "Initialized custom trust root");
        Ok(guard)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Put the original trust root back.
    pub async fn restore(mut self) -> Result<()> {
        self.armed = false;
        reset(&self.home).await
    }

    /// Leave the bootstrapped trust root in place (used by `trust init`).
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for TrustConfig {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = reset_blocking(&self.home) {
            warn!(home = %self.home.display(), error = %e, "Failed to restore trust root");
        }
    }
}

/// Undo a bootstrap: drop the harness-created `.sigstore` and move the
/// backup back.
///
/// `.sigstore` is only removed while the bootstrap marker is present, and
/// the marker goes before the backup is moved, so repeated calls never touch
/// a restored or user-owned directory.
pub async fn reset(home: &Path) -> Result<()> {
    let sigstore = TrustConfig::sigstore_dir(home);
    let backup = TrustConfig::backup_dir(home);
    let marker = TrustConfig::marker_file(home);

    if tokio::fs::try_exists(&marker).await? {
        if tokio::fs::try_exists(&sigstore).await? {
            tokio::fs::remove_dir_all(&sigstore).await?;
        }
        tokio::fs::remove_file(&marker).await?;
    }
    if tokio::fs::try_exists(&backup).await? {
        if tokio::fs::try_exists(&sigstore).await? {
            warn!(
                path = %sigstore.display(),
                backup = %backup.display(),
                "Trust root was not created by a bootstrap, leaving backup in place"
            );
            return Ok(());
        }
        tokio::fs::rename(&backup, &sigstore).await?;
        info!(path = %sigstore.display(), "Restored original trust root");
    }
    Ok(())
}

fn reset_blocking(home: &Path) -> std::io::Result<()> {
    let sigstore = TrustConfig::sigstore_dir(home);
    let backup = TrustConfig::backup_dir(home);
    let marker = TrustConfig::marker_file(home);

    if marker.try_exists()? {
        if sigstore.try_exists()? {
            std::fs::remove_dir_all(&sigstore)?;
        }
        std::fs::remove_file(&marker)?;
    }
    if backup.try_exists()? && !sigstore.try_exists()? {
        std::fs::rename(&backup, &sigstore)?;
    }
    Ok(())
}
