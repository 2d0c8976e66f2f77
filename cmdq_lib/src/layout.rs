use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use crate::error::{QueueError, Result};

pub const PENDING_DIR: &str = "pending";
pub const COMPLETED_DIR: &str = "completed";
pub const FAILED_DIR: &str = "failed";
pub const LOG_FILE: &str = "daemon.log";

/// Directory structure under the queue root.
#[derive(Debug, Clone)]
pub struct QueueLayout {
    root: PathBuf,
    pending: PathBuf,
    completed: PathBuf,
    failed: PathBuf,
    log_file: PathBuf,
}

impl QueueLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            pending: root.join(PENDING_DIR),
            completed: root.join(COMPLETED_DIR),
            failed: root.join(FAILED_DIR),
            log_file: root.join(LOG_FILE),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pending(&self) -> &Path {
        &self.pending
    }

    pub fn completed(&self) -> &Path {
        &self.completed
    }

    pub fn failed(&self) -> &Path {
        &self.failed
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.pending, &self.completed, &self.failed] {
            fs::create_dir_all(dir).map_err(|e| QueueError::io(dir, e))?;
        }
        Ok(())
    }

    /// Maps a descriptor's `result_file` onto a path below the root.
    /// Absolute paths and parent components are refused.
    pub fn resolve_result_file(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        let escapes = relative.is_empty()
            || candidate.components().any(|c| {
                matches!(
                    c,
                    Component::ParentDir | Component::RootDir | Component::Prefix(_)
                )
            });
        if escapes {
            return Err(QueueError::UnsafeResultPath(relative.to_string()));
        }
        Ok(self.root.join(candidate))
    }
}
