//! Per-task scratch directories.
//!
//! Each task gets `<root>/<sanitized task id>-<nonce>/`. The directory is
//! the only place its file and shell tools may touch, and it is deleted when
//! the task's arena is released.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::WorkspaceError;

/// Owner of the root under which task directories are created.
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    root: PathBuf,
}

impl WorkspaceRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, empty directory for `task_id`.
    pub async fn create(&self, task_id: &str) -> Result<TaskWorkspace, WorkspaceError> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let dir = self
            .root
            .join(format!("{}-{}", sanitize(task_id), &nonce[..8]));
        if dir.strip_prefix(&self.root).is_err() {
            return Err(WorkspaceError::PathEscape(dir.display().to_string()));
        }
        fs::create_dir_all(&dir).await?;
        Ok(TaskWorkspace { dir })
    }
}

/// A task's private scratch directory.
#[derive(Debug)]
pub struct TaskWorkspace {
    dir: PathBuf,
}

impl TaskWorkspace {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Delete the directory and everything in it. Missing is not an error.
    pub async fn remove(self) -> Result<(), WorkspaceError> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keep task ids from introducing path separators or traversal.
fn sanitize(task_id: &str) -> String {
    let cleaned: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned
    }
}
