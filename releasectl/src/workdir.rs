//! Per-task working directories
//!
//! Every orchestration call gets a fresh directory under the configured root.
//! It serves as the CLI home (`CF_HOME`) and holds generated manifests. The
//! directory is removed when the [`ScopedWorkDir`] is released or dropped,
//! whichever comes first, so every exit path cleans up.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::filesys::{Dir, File};

#[derive(Debug, Clone)]
pub struct WorkingDirectoryManager {
    root: Dir,
}

impl WorkingDirectoryManager {
    pub fn new(root: Dir) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Dir {
        &self.root
    }

    /// Create a uniquely named directory for one task
    pub async fn allocate(&self) -> Result<ScopedWorkDir, DeployError> {
        let dir = self
            .root
            .create_unique_subdir("task")
            .await
            .map_err(|e| {
                DeployError::config(format!("Failed to create working directory: {}", e))
            })?;

        let path = tokio::fs::canonicalize(dir.path()).await.map_err(|e| {
            DeployError::config(format!(
                "Failed to resolve working directory {}: {}",
                dir.path().display(),
                e
            ))
        })?;
        debug!("Allocated working directory {}", path.display());

        Ok(ScopedWorkDir {
            path,
            released: false,
        })
    }
}

/// A working directory owned by one orchestration call
#[derive(Debug)]
pub struct ScopedWorkDir {
    path: PathBuf,
    released: bool,
}

impl ScopedWorkDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Canonical path without a trailing separator, as injected into commands
    pub fn home_path(&self) -> String {
        let raw = self.path.to_string_lossy();
        let trimmed = raw.trim_end_matches(std::path::MAIN_SEPARATOR);
        if trimmed.is_empty() {
            raw.into_owned()
        } else {
            trimmed.to_string()
        }
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Remove the directory. Failures are logged, never returned.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("Removed working directory {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove working directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for ScopedWorkDir {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed working directory {} on drop", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove working directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
