//! Per-invocation context handed to tools.

use std::path::{Path, PathBuf};

/// What a tool may know about the task it runs under.
///
/// Carries no conversation state; tools only see the task id (for logging)
/// and the task's private scratch directory.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub task_id: String,
    pub workdir: PathBuf,
}

impl ToolContext {
    pub fn new(task_id: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            task_id: task_id.into(),
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}
