//! Cleanup after failed runs
//!
//! Destroys applied infrastructure and removes the generated artifacts from
//! the working directory. Repeated calls are safe: once nothing is left the
//! controller reports [`CleanupOutcome::AlreadyClean`] without touching the
//! apply tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::document::MAIN_TF;
use crate::pipeline::apply::ApplyTool;
use crate::{Error, Result};

/// Files written by synthesis and the apply tool
pub const ARTIFACT_FILES: &[&str] = &[
    MAIN_TF,
    "terraform.tfstate",
    "terraform.tfstate.backup",
    ".terraform.lock.hcl",
];

/// Directory the apply tool caches providers in
pub const ARTIFACT_DIR: &str = ".terraform";

/// What a cleanup call did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Infrastructure destroyed and artifacts removed
    Destroyed,
    /// Cleanup disabled; everything left in place
    Retained,
    /// Nothing to clean up
    AlreadyClean,
}

/// Destroys infrastructure and removes artifacts
pub struct CleanupController {
    tool: Arc<dyn ApplyTool>,
    work_dir: PathBuf,
    enabled: bool,
    lock: Mutex<()>,
}

impl CleanupController {
    /// Controller for `work_dir`; when `enabled` is false every call retains
    pub fn new(tool: Arc<dyn ApplyTool>, work_dir: impl AsRef<Path>, enabled: bool) -> Self {
        Self {
            tool,
            work_dir: work_dir.as_ref().to_path_buf(),
            enabled,
            lock: Mutex::new(()),
        }
    }

    /// Whether cleanup runs at all
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Destroy and remove artifacts
    ///
    /// A failed destroy leaves the artifacts (and so the state) in place and
    /// is returned as an error, so a later call can try again.
    pub async fn cleanup(&self) -> Result<CleanupOutcome> {
        if !self.enabled {
            info!(work_dir = %self.work_dir.display(), "cleanup disabled, retaining resources");
            return Ok(CleanupOutcome::Retained);
        }

        let _guard = self.lock.lock().await;
        if !artifacts_present(&self.work_dir).await {
            return Ok(CleanupOutcome::AlreadyClean);
        }

        info!(work_dir = %self.work_dir.display(), "cleaning up");
        self.tool.destroy().await?;
        remove_artifacts(&self.work_dir).await?;
        info!(work_dir = %self.work_dir.display(), "cleanup complete");
        Ok(CleanupOutcome::Destroyed)
    }
}

async fn artifacts_present(dir: &Path) -> bool {
    for name in ARTIFACT_FILES.iter().chain([&ARTIFACT_DIR]) {
        if tokio::fs::try_exists(dir.join(name)).await.unwrap_or(false) {
            return true;
        }
    }
    false
}

async fn remove_artifacts(dir: &Path) -> Result<()> {
    for name in ARTIFACT_FILES {
        let path = dir.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(path, e)),
        }
    }

    let cache = dir.join(ARTIFACT_DIR);
    match tokio::fs::remove_dir_all(&cache).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %cache.display(), error = %e, "failed to remove provider cache");
            return Err(Error::io(cache, e));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::apply::MockApplyTool;

    fn seed(dir: &Path) {
        std::fs::write(dir.join(MAIN_TF), "locals {}\n").unwrap();
        std::fs::write(dir.join("terraform.tfstate"), "{}").unwrap();
        std::fs::create_dir_all(dir.join(ARTIFACT_DIR).join("providers")).unwrap();
    }

    #[tokio::test]
    async fn second_cleanup_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let mut tool = MockApplyTool::new();
        tool.expect_destroy().times(1).returning(|| Ok(()));
        let controller = CleanupController::new(Arc::new(tool), dir.path(), true);

        assert_eq!(controller.cleanup().await.unwrap(), CleanupOutcome::Destroyed);
        assert!(!dir.path().join(MAIN_TF).exists());
        assert!(!dir.path().join(ARTIFACT_DIR).exists());
        assert_eq!(controller.cleanup().await.unwrap(), CleanupOutcome::AlreadyClean);
    }

    #[tokio::test]
    async fn disabled_cleanup_retains_everything() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let mut tool = MockApplyTool::new();
        tool.expect_destroy().never();
        let controller = CleanupController::new(Arc::new(tool), dir.path(), false);

        assert_eq!(controller.cleanup().await.unwrap(), CleanupOutcome::Retained);
        assert!(dir.path().join(MAIN_TF).exists());
    }

    #[tokio::test]
    async fn failed_destroy_keeps_state_for_a_retry() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let mut tool = MockApplyTool::new();
        let mut calls = 0;
        tool.expect_destroy().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Err(Error::apply("destroy failed"))
            } else {
                Ok(())
            }
        });
        let controller = CleanupController::new(Arc::new(tool), dir.path(), true);

        assert!(controller.cleanup().await.is_err());
        assert!(dir.path().join("terraform.tfstate").exists());
        assert_eq!(controller.cleanup().await.unwrap(), CleanupOutcome::Destroyed);
    }
}
